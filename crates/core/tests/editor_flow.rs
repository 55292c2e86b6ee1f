//! End-to-end editing sessions against the lopdf backend

use lopdf::{dictionary, Document, Object, Stream};
use pdf_overlay_core::{
    Color, EditableObject, Editor, EditorConfig, ImageAsset, ObjectPatch, PageSlot, PointerEvent,
    PointerOutcome, Rect, RenderConfig, RenderTarget, Rotation, ShapeKind, TextObject, Tool,
    Viewport,
};
use pdf_overlay_render::{LopdfBackend, RenderError};
use std::time::Duration;

/// PDF whose page `i` is `100 + 10 * i` points wide and 400 tall, so the
/// output order can be read back from the media boxes.
fn numbered_pdf(count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, b"0 0 m 10 10 l S".to_vec()));

    let kids: Vec<Object> = (0..count)
        .map(|i| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(100 + 10 * i as i64),
                    Object::Integer(400),
                ],
            })
            .into()
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count as i64,
            "Resources" => dictionary! {},
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn png_bytes() -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(8, 4, image::Rgba([200, 10, 10, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn editor(pages: usize) -> Editor<LopdfBackend> {
    let config = EditorConfig::new()
        .with_render(RenderConfig::new().with_poll_interval(Duration::from_millis(1)))
        .with_history_debounce(Duration::from_millis(50));
    let mut editor = Editor::new(LopdfBackend::new(), config).unwrap();
    editor.load(numbered_pdf(pages)).unwrap();
    editor
}

fn page_width(doc: &Document, page_id: lopdf::ObjectId) -> f32 {
    let media_box = doc
        .get_dictionary(page_id)
        .unwrap()
        .get(b"MediaBox")
        .unwrap()
        .as_array()
        .unwrap();
    media_box[2].as_float().unwrap()
}

fn page_content(doc: &Document, page_id: lopdf::ObjectId) -> String {
    String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).to_string()
}

#[test]
fn test_thumbnail_request_touches_only_its_page() {
    let editor = editor(3);
    let pages = editor.pages();
    assert_eq!(pages.len(), 3);
    assert!(pages.iter().all(|p| p.width == 0.0 && p.thumbnail.is_none()));

    assert!(editor.request_render(pages[1].id, RenderTarget::Thumbnail));
    assert_eq!(editor.render_pending(), 1);

    let pages = editor.pages();
    assert!(pages[1].thumbnail.as_ref().is_some_and(|slot| slot.is_ready()));
    assert_eq!((pages[1].width, pages[1].height), (110.0, 400.0));
    for untouched in [&pages[0], &pages[2]] {
        assert!(untouched.thumbnail.is_none());
        assert!(untouched.canvas.is_none());
        assert_eq!(untouched.width, 0.0);
    }
}

#[test]
fn test_reverse_drag_creates_normalized_rectangle() {
    let mut editor = editor(1);
    editor.set_tool(Tool::Shape(ShapeKind::Rectangle));

    editor.pointer_down(PointerEvent::new(1, 10.0, 10.0));
    editor.pointer_move(PointerEvent::new(1, 7.0, 7.0));
    let PointerOutcome::Created(id) = editor.pointer_up(PointerEvent::new(1, 5.0, 5.0)) else {
        panic!("rectangle was not created");
    };

    assert_eq!(editor.annotations().get(id).unwrap().bounds, Rect::new(5.0, 5.0, 5.0, 5.0));
}

#[test]
fn test_delete_page_with_render_in_flight() {
    let mut editor = editor(3);
    let victim = editor.pages()[1].id;

    editor.request_render(victim, RenderTarget::Thumbnail);
    editor.render_pending();
    assert!(editor.request_render(victim, RenderTarget::Canvas));

    let ticket = editor.scheduler().next_ticket().unwrap();
    assert_eq!(ticket.target, RenderTarget::Canvas);
    assert_eq!(editor.scheduler().in_flight(), 1);

    editor.delete_page(victim).unwrap();
    let result = ticket.render(&**editor.backend());
    editor.scheduler().complete(ticket, result);

    assert_eq!(editor.page_count(), 2);
    assert!(editor.catalog().get(victim).is_none());
    assert!(editor.pages().iter().all(|p| p.canvas.is_none()));
    assert_eq!(editor.scheduler().in_flight(), 0);
    assert_eq!(editor.scheduler().stats().discarded, 1);
}

#[test]
fn test_undo_all_then_redo_all() {
    let mut editor = editor(2);
    let note = |text: &str| {
        EditableObject::text(
            1,
            Rect::new(20.0, 20.0, 80.0, 20.0),
            TextObject {
                text: text.to_string(),
                font_size: 12.0,
                color: Color::BLACK,
            },
        )
    };

    let first = editor.add_object(note("one")).unwrap();
    editor.commit_history();
    editor.update_object(first, ObjectPatch::new().with_text("uno"));
    editor.commit_history();
    editor.rotate_page(editor.pages()[1].id, 90).unwrap();
    editor.commit_history();
    let second = editor.add_object(note("two")).unwrap();
    editor.commit_history();

    let mut undone = 0;
    while editor.undo() {
        undone += 1;
    }
    assert_eq!(undone, 4);
    assert!(editor.annotations().is_empty());
    assert_eq!(editor.pages()[1].rotation, Rotation::Deg0);
    assert!(!editor.undo());

    let mut redone = 0;
    while editor.redo() {
        redone += 1;
    }
    assert_eq!(redone, 4);
    assert_eq!(editor.annotations().len(), 2);
    assert!(editor.annotations().contains(second));
    assert_eq!(editor.pages()[1].rotation, Rotation::Deg90);
    assert!(!editor.redo());
}

#[test]
fn test_debounced_history_commits_after_idle_window() {
    let mut editor = editor(1);
    editor.set_tool(Tool::Text);
    editor.pointer_down(PointerEvent::new(1, 1.0, 1.0));
    editor.pointer_up(PointerEvent::new(1, 1.0, 1.0));

    assert!(editor.has_pending_history());
    assert!(!editor.poll_history());
    std::thread::sleep(Duration::from_millis(80));
    assert!(editor.poll_history());
    assert_eq!(editor.history().len(), 2);
}

#[test]
fn test_export_round_trip() {
    let mut editor = editor(3);

    // Last page first, then quarter-turn the (original) first page
    editor.reorder_page(2, 0).unwrap();
    let original_first = editor.pages()[1].id;
    editor.rotate_page(original_first, 90).unwrap();

    editor.set_tool(Tool::Shape(ShapeKind::Rectangle));
    editor.pointer_down(PointerEvent::new(1, 10.0, 10.0));
    editor.pointer_up(PointerEvent::new(1, 5.0, 5.0));

    editor.set_tool(Tool::Text);
    editor.pointer_down(PointerEvent::new(2, 30.0, 40.0));
    editor.pointer_up(PointerEvent::new(2, 30.0, 40.0));

    let asset = ImageAsset::decode(png_bytes()).unwrap();
    assert_eq!((asset.pixel_width, asset.pixel_height), (8, 4));
    editor.set_tool(Tool::Image(asset));
    editor.pointer_down(PointerEvent::new(3, 0.0, 0.0));

    let bytes = editor.export().unwrap();
    let doc = Document::load_mem(&bytes).unwrap();
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 3);

    let widths: Vec<f32> = pages.values().map(|id| page_width(&doc, *id)).collect();
    assert_eq!(widths, vec![120.0, 100.0, 110.0]);

    let rotate = |n: u32| {
        doc.get_dictionary(pages[&n])
            .unwrap()
            .get(b"Rotate")
            .unwrap()
            .as_i64()
            .unwrap()
    };
    assert_eq!(rotate(1), 0);
    assert_eq!(rotate(2), 90);

    // 400pt tall pages: y = 400 - 5 - 5 for the rectangle, 400 - 40 - 16
    // for the text baseline
    assert!(page_content(&doc, pages[&1]).contains("5 390 5 5 re"));
    let text_page = page_content(&doc, pages[&2]);
    assert!(text_page.contains("30 344 Td"));
    assert!(text_page.contains("(Text) Tj"));
    assert!(page_content(&doc, pages[&3]).contains("Do"));

    // Exporting leaves the session intact
    assert_eq!(editor.annotations().len(), 3);
    assert!(!editor.has_pending_history());
}

#[test]
fn test_failed_load_keeps_previous_document() {
    let mut editor = editor(2);
    let handle = editor.document();

    assert!(editor.load(b"%PDF-1.5 garbage".to_vec()).is_err());
    assert_eq!(editor.document(), handle);
    assert_eq!(editor.page_count(), 2);
}

#[test]
fn test_worker_pool_renders_visible_pages() {
    let mut editor = editor(6);
    editor.start_render_workers().unwrap();

    let pages = editor.pages();
    let slots: Vec<PageSlot> = pages
        .iter()
        .enumerate()
        .map(|(i, page)| PageSlot::new(page.id, i as f32 * 500.0, 500.0))
        .collect();
    let _subscriptions: Vec<_> = pages
        .iter()
        .map(|page| editor.subscribe(page.id, RenderTarget::Thumbnail))
        .collect();

    // 200pt preload margin: the first viewport reaches y=900, the second
    // y=1100, which pulls in the third page
    let queued = editor.observe(RenderTarget::Thumbnail, Viewport::new(0.0, 700.0), &slots);
    assert_eq!(queued, vec![pages[0].id, pages[1].id]);

    let queued = editor.observe(RenderTarget::Thumbnail, Viewport::new(0.0, 900.0), &slots);
    assert_eq!(queued, vec![pages[2].id]);

    assert!(editor
        .render_pool()
        .unwrap()
        .wait_idle(Duration::from_secs(10)));
    let pages = editor.pages();
    assert!(pages[..3]
        .iter()
        .all(|p| p.thumbnail.as_ref().is_some_and(|slot| slot.is_ready())));
    assert!(pages[3..].iter().all(|p| p.thumbnail.is_none()));

    editor.stop_render_workers();
}

#[test]
fn test_backend_errors_surface_as_load_errors() {
    let err: pdf_overlay_core::LoadError = RenderError::EncryptedUnsupported.into();
    assert!(matches!(err, pdf_overlay_core::LoadError::Encrypted));
}
