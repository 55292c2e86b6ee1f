//! Raster and geometry primitives shared by the render pipeline
//!
//! Everything the rest of the workspace needs to talk about a rendered page:
//! page rotation, page size, colors, and the bitmap produced by a rasterizer.

use image::{Rgba, RgbaImage};

/// Page rotation in quarter turns
///
/// Rotations are always clockwise as seen on screen, matching the PDF
/// `/Rotate` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalize an arbitrary multiple of 90 degrees.
    ///
    /// Values that are not a multiple of 90 are rounded to the nearest
    /// quarter turn, negative values wrap around.
    pub fn from_degrees(degrees: i32) -> Self {
        let quarter = ((degrees as f32 / 90.0).round() as i32).rem_euclid(4);
        match quarter {
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            3 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    /// Rotation in degrees (0, 90, 180 or 270)
    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Apply a relative rotation
    pub fn rotated_by(self, delta_degrees: i32) -> Self {
        Self::from_degrees(self.degrees() + delta_degrees)
    }

    /// Whether width and height swap when displayed
    pub fn is_sideways(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Page size in source units (points)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub const LETTER: PageSize = PageSize {
        width: 612.0,
        height: 792.0,
    };

    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// RGBA color representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Create a new color
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Convert to normalized RGBA values (0.0 to 1.0)
    pub fn to_normalized(&self) -> (f32, f32, f32, f32) {
        (
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
            self.a as f32 / 255.0,
        )
    }
}

impl Color {
    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255, a: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };
}

/// A rendered bitmap together with the scale it was produced at
#[derive(Debug, Clone)]
pub struct Raster {
    pub image: RgbaImage,
    pub scale: f32,
}

impl Raster {
    pub fn new(image: RgbaImage, scale: f32) -> Self {
        Self { image, scale }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Blank page bitmap for a page of `size` drawn at `scale`.
    ///
    /// The page frame gets a light gray border so empty pages stay visible
    /// against a white background.
    pub fn blank_page(size: PageSize, scale: f32, rotation: Rotation) -> Self {
        let scale = if scale <= 0.0 { 1.0 } else { scale };
        let (w, h) = if rotation.is_sideways() {
            (size.height, size.width)
        } else {
            (size.width, size.height)
        };
        let width = (w * scale).round().max(1.0) as u32;
        let height = (h * scale).round().max(1.0) as u32;

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        if width >= 4 && height >= 4 {
            let frame = Rgba([220, 220, 220, 255]);
            for x in 0..width {
                image.put_pixel(x, 0, frame);
                image.put_pixel(x, height - 1, frame);
            }
            for y in 0..height {
                image.put_pixel(0, y, frame);
                image.put_pixel(width - 1, y, frame);
            }
        }

        Self { image, scale }
    }
}

/// Output of a single rasterization
///
/// Besides the bitmap, rendering discovers the page's intrinsic size and
/// rotation, which the page catalog only learns lazily.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub raster: Raster,
    pub page_size: PageSize,
    pub rotation: Rotation,
}
