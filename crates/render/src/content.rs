//! Content stream generation for overlay primitives
//!
//! Turns [`DrawCommand`]s into PDF content stream operators. Each command is
//! wrapped in its own `q`/`Q` pair so a pivot rotation never leaks into the
//! next primitive.

use crate::backend::{DrawCommand, PaintStyle, Pivot, RenderError};
use crate::raster::Color;
use std::fmt::Write as FmtWrite;

/// Magic number for approximating a quarter ellipse with one cubic Bezier
const KAPPA: f32 = 0.552_284_8;

/// Resource names a command needs on its page
pub struct ResourceNames<'a> {
    pub font: &'a str,
    pub image: Option<&'a str>,
}

fn fmt_err(e: std::fmt::Error) -> RenderError {
    RenderError::Backend(format!("content stream formatting failed: {e}"))
}

/// Format a number the way PDF operators expect (no exponent, trimmed).
fn num(value: f32) -> String {
    let value = if value.is_finite() { value } else { 0.0 };
    let mut s = format!("{:.4}", value);
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

/// Convert color to PDF color space (normalized 0-1 range)
fn rgb(color: &Color) -> (String, String, String) {
    let (r, g, b, _) = color.to_normalized();
    (num(r), num(g), num(b))
}

/// Escape a string for a PDF literal, mapping to Latin-1 bytes.
///
/// Characters outside Latin-1 cannot be shown with a standard font and
/// become `?`.
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '(' => escaped.push_str("\\("),
            ')' => escaped.push_str("\\)"),
            '\n' | '\r' => escaped.push(' '),
            c if c.is_ascii() && !c.is_ascii_control() => escaped.push(c),
            c if (c as u32) < 256 && !c.is_control() => {
                escaped.push_str(&format!("\\{:03o}", c as u32));
            }
            _ => escaped.push('?'),
        }
    }
    escaped
}

fn write_pivot(stream: &mut String, pivot: Option<Pivot>) -> Result<(), RenderError> {
    if let Some(pivot) = pivot {
        let m = pivot.matrix();
        writeln!(
            stream,
            "{} {} {} {} {} {} cm",
            num(m[0]),
            num(m[1]),
            num(m[2]),
            num(m[3]),
            num(m[4]),
            num(m[5])
        )
        .map_err(fmt_err)?;
    }
    Ok(())
}

fn write_style(stream: &mut String, style: &PaintStyle) -> Result<(), RenderError> {
    if let Some(stroke) = &style.stroke {
        let (r, g, b) = rgb(stroke);
        writeln!(stream, "{} {} {} RG", r, g, b).map_err(fmt_err)?;
        writeln!(stream, "{} w", num(style.stroke_width)).map_err(fmt_err)?;
    }
    if let Some(fill) = &style.fill {
        let (r, g, b) = rgb(fill);
        writeln!(stream, "{} {} {} rg", r, g, b).map_err(fmt_err)?;
    }
    Ok(())
}

/// Painting operator for a path with the given style
fn paint_operator(style: &PaintStyle, closed: bool) -> Option<&'static str> {
    let stroke = style.stroke.is_some() && style.stroke_width > 0.0;
    match (stroke, style.fill.is_some(), closed) {
        (true, true, _) => Some("B"),
        (true, false, true) => Some("s"),
        (true, false, false) => Some("S"),
        (false, true, _) => Some("f"),
        (false, false, _) => None,
    }
}

fn write_ellipse(
    stream: &mut String,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
) -> Result<(), RenderError> {
    let rx = width / 2.0;
    let ry = height / 2.0;
    let cx = x + rx;
    let cy = y + ry;
    let kx = rx * KAPPA;
    let ky = ry * KAPPA;

    // Start at right point, then four quarter curves counter-clockwise
    writeln!(stream, "{} {} m", num(cx + rx), num(cy)).map_err(fmt_err)?;
    let curves = [
        (cx + rx, cy + ky, cx + kx, cy + ry, cx, cy + ry),
        (cx - kx, cy + ry, cx - rx, cy + ky, cx - rx, cy),
        (cx - rx, cy - ky, cx - kx, cy - ry, cx, cy - ry),
        (cx + kx, cy - ry, cx + rx, cy - ky, cx + rx, cy),
    ];
    for (x1, y1, x2, y2, x3, y3) in curves {
        writeln!(
            stream,
            "{} {} {} {} {} {} c",
            num(x1),
            num(y1),
            num(x2),
            num(y2),
            num(x3),
            num(y3)
        )
        .map_err(fmt_err)?;
    }
    Ok(())
}

/// Append the operators for one command to `stream`
pub fn write_command(
    stream: &mut String,
    command: &DrawCommand,
    names: &ResourceNames<'_>,
) -> Result<(), RenderError> {
    writeln!(stream, "q").map_err(fmt_err)?;
    write_pivot(stream, command.pivot())?;

    match command {
        DrawCommand::Rectangle {
            x,
            y,
            width,
            height,
            style,
            ..
        } => {
            write_style(stream, style)?;
            if let Some(op) = paint_operator(style, true) {
                writeln!(stream, "{} {} {} {} re", num(*x), num(*y), num(*width), num(*height))
                    .map_err(fmt_err)?;
                writeln!(stream, "{}", op).map_err(fmt_err)?;
            }
        }

        DrawCommand::Ellipse {
            x,
            y,
            width,
            height,
            style,
            ..
        } => {
            write_style(stream, style)?;
            if let Some(op) = paint_operator(style, true) {
                write_ellipse(stream, *x, *y, *width, *height)?;
                writeln!(stream, "{}", op).map_err(fmt_err)?;
            }
        }

        DrawCommand::Polyline { points, style, .. } => {
            let stroke_only = PaintStyle { fill: None, ..*style };
            write_style(stream, &stroke_only)?;
            if let (Some((first, rest)), Some(op)) =
                (points.split_first(), paint_operator(&stroke_only, false))
            {
                writeln!(stream, "1 J 1 j").map_err(fmt_err)?;
                writeln!(stream, "{} {} m", num(first.0), num(first.1)).map_err(fmt_err)?;
                for (px, py) in rest {
                    writeln!(stream, "{} {} l", num(*px), num(*py)).map_err(fmt_err)?;
                }
                writeln!(stream, "{}", op).map_err(fmt_err)?;
            }
        }

        DrawCommand::Text {
            x,
            y,
            text,
            font_size,
            color,
            ..
        } => {
            let (r, g, b) = rgb(color);
            writeln!(stream, "BT").map_err(fmt_err)?;
            writeln!(stream, "/{} {} Tf", names.font, num(*font_size)).map_err(fmt_err)?;
            writeln!(stream, "{} {} {} rg", r, g, b).map_err(fmt_err)?;
            writeln!(stream, "{} {} Td", num(*x), num(*y)).map_err(fmt_err)?;
            writeln!(stream, "({}) Tj", escape_text(text)).map_err(fmt_err)?;
            writeln!(stream, "ET").map_err(fmt_err)?;
        }

        DrawCommand::Image {
            x,
            y,
            width,
            height,
            ..
        } => {
            let name = names.image.ok_or_else(|| {
                RenderError::Backend("image command without an image resource".to_string())
            })?;
            writeln!(
                stream,
                "{} 0 0 {} {} {} cm",
                num(*width),
                num(*height),
                num(*x),
                num(*y)
            )
            .map_err(fmt_err)?;
            writeln!(stream, "/{} Do", name).map_err(fmt_err)?;
        }
    }

    writeln!(stream, "Q").map_err(fmt_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ImageHandle;

    const NAMES: ResourceNames<'static> = ResourceNames {
        font: "FOv",
        image: None,
    };

    #[test]
    fn test_number_formatting() {
        assert_eq!(num(1.0), "1");
        assert_eq!(num(0.5), "0.5");
        assert_eq!(num(-0.00001), "0");
        assert_eq!(num(f32::NAN), "0");
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("a(b)c\\"), "a\\(b\\)c\\\\");
        assert_eq!(escape_text("caf\u{e9}"), "caf\\351");
        assert_eq!(escape_text("\u{4e2d}"), "?");
    }

    #[test]
    fn test_rectangle_stream() {
        let mut stream = String::new();
        let command = DrawCommand::Rectangle {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
            style: PaintStyle {
                stroke: Some(Color::RED),
                stroke_width: 2.0,
                fill: None,
            },
            pivot: None,
        };
        write_command(&mut stream, &command, &NAMES).unwrap();
        assert!(stream.starts_with("q\n"));
        assert!(stream.contains("1 0 0 RG"));
        assert!(stream.contains("10 20 30 40 re\nS\n"));
        assert!(stream.ends_with("Q\n"));
    }

    #[test]
    fn test_unpainted_shape_emits_no_path() {
        let mut stream = String::new();
        let command = DrawCommand::Ellipse {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            style: PaintStyle {
                stroke: None,
                stroke_width: 0.0,
                fill: None,
            },
            pivot: None,
        };
        write_command(&mut stream, &command, &NAMES).unwrap();
        assert_eq!(stream, "q\nQ\n");
    }

    #[test]
    fn test_text_stream_with_pivot() {
        let mut stream = String::new();
        let command = DrawCommand::Text {
            x: 5.0,
            y: 100.0,
            text: "Hi".to_string(),
            font_size: 12.0,
            color: Color::BLACK,
            pivot: Some(Pivot {
                degrees: 90.0,
                cx: 0.0,
                cy: 0.0,
            }),
        };
        write_command(&mut stream, &command, &NAMES).unwrap();
        assert!(stream.contains("cm\nBT\n/FOv 12 Tf"));
        assert!(stream.contains("5 100 Td\n(Hi) Tj\nET"));
    }

    #[test]
    fn test_image_requires_resource_name() {
        let mut stream = String::new();
        let command = DrawCommand::Image {
            image: ImageHandle(0),
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            pivot: None,
        };
        assert!(write_command(&mut stream, &command, &NAMES).is_err());

        let names = ResourceNames {
            font: "FOv",
            image: Some("Im0"),
        };
        let mut stream = String::new();
        write_command(&mut stream, &command, &names).unwrap();
        assert!(stream.contains("1 0 0 1 0 0 cm\n/Im0 Do"));
    }
}
