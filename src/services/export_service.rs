use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use encoding_rs::WINDOWS_1252;
use flate2::{write::ZlibEncoder, Compression};
use image::GenericImageView;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::error::Result;
use crate::models::message::Message;

// US Letter, in points.
pub const PAGE_WIDTH: i64 = 612;
pub const PAGE_HEIGHT: i64 = 792;
pub const MARGIN: i64 = 50;
pub const TOP: i64 = PAGE_HEIGHT - MARGIN;

pub const TITLE: &str = "Chat History";
pub const FONT_SIZE: i64 = 12;
pub const TITLE_GAP: i64 = 30;
pub const LINE_HEIGHT: i64 = 15;
pub const WRAP_WIDTH: usize = 95;
pub const TEXT_GAP: i64 = 5;
pub const IMAGE_BOX_WIDTH: i64 = 288;
pub const IMAGE_BOX_HEIGHT: i64 = 216;
pub const IMAGE_GAP: i64 = 20;
// Embedded pictures keep twice the box resolution at most.
const MAX_IMAGE_PIXELS: (u32, u32) = (2 * IMAGE_BOX_WIDTH as u32, 2 * IMAGE_BOX_HEIGHT as u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOp {
    Text {
        x: i64,
        y: i64,
        text: String,
    },
    /// `entry` indexes the slice handed to [`layout`]; `y` is the lower edge.
    Image {
        entry: usize,
        x: i64,
        y: i64,
        width: i64,
        height: i64,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Page {
    pub ops: Vec<DrawOp>,
}

/// One record prepared for the document.
#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub header: String,
    pub lines: Vec<String>,
    /// Pixel size of an image that could be loaded.
    pub image_size: Option<(u32, u32)>,
}

struct Cursor {
    pages: Vec<Page>,
    y: i64,
}

impl Cursor {
    fn new() -> Self {
        Self {
            pages: vec![Page::default()],
            y: TOP,
        }
    }

    fn new_page(&mut self) {
        self.pages.push(Page::default());
        self.y = TOP;
    }

    fn push(&mut self, op: DrawOp) {
        if let Some(page) = self.pages.last_mut() {
            page.ops.push(op);
        }
    }

    fn line(&mut self, text: &str) {
        if self.y < MARGIN {
            self.new_page();
        }
        self.push(DrawOp::Text {
            x: MARGIN,
            y: self.y,
            text: text.to_string(),
        });
        self.y -= LINE_HEIGHT;
    }

    fn image(&mut self, entry: usize, (px_width, px_height): (u32, u32)) {
        if self.y - IMAGE_BOX_HEIGHT < MARGIN {
            self.new_page();
        }
        let (width, height) = fit_in_box(px_width, px_height);
        self.push(DrawOp::Image {
            entry,
            x: MARGIN,
            y: self.y - height,
            width,
            height,
        });
        self.y -= IMAGE_BOX_HEIGHT + IMAGE_GAP;
    }
}

/// Places the title and every entry top to bottom, breaking pages whenever
/// the next line or image box does not fit above the bottom margin.
pub fn layout(entries: &[ExportEntry]) -> Vec<Page> {
    let mut cursor = Cursor::new();
    cursor.push(DrawOp::Text {
        x: MARGIN,
        y: cursor.y,
        text: TITLE.to_string(),
    });
    cursor.y -= TITLE_GAP;

    for (idx, entry) in entries.iter().enumerate() {
        cursor.line(&entry.header);

        if !entry.lines.is_empty() {
            for line in &entry.lines {
                cursor.line(line);
            }
            cursor.y -= TEXT_GAP;
        }

        if let Some(size) = entry.image_size {
            cursor.image(idx, size);
        }
    }

    cursor.pages
}

/// Scales an image to fit the fixed box while keeping its aspect ratio.
fn fit_in_box(px_width: u32, px_height: u32) -> (i64, i64) {
    if px_width == 0 || px_height == 0 {
        return (IMAGE_BOX_WIDTH, IMAGE_BOX_HEIGHT);
    }
    let scale = f64::min(
        IMAGE_BOX_WIDTH as f64 / px_width as f64,
        IMAGE_BOX_HEIGHT as f64 / px_height as f64,
    );
    let width = ((px_width as f64 * scale).round() as i64).clamp(1, IMAGE_BOX_WIDTH);
    let height = ((px_height as f64 * scale).round() as i64).clamp(1, IMAGE_BOX_HEIGHT);
    (width, height)
}

/// Greedy word wrap on whitespace. A word longer than `width` first fills
/// what is left of the current line, then continues in `width` chunks.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        let mut rest = chars.as_slice();

        while !rest.is_empty() {
            let space_left = if current_len == 0 {
                width
            } else {
                width.saturating_sub(current_len + 1)
            };

            if rest.len() <= space_left {
                if current_len > 0 {
                    current.push(' ');
                    current_len += 1;
                }
                current.extend(rest.iter());
                current_len += rest.len();
                break;
            }

            if rest.len() > width && space_left > 0 {
                let (head, tail) = rest.split_at(space_left);
                if current_len > 0 {
                    current.push(' ');
                }
                current.extend(head.iter());
                rest = tail;
            }
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
    }

    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// A picture ready for embedding: RGB samples, already deflated.
struct LoadedImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

fn load_image(path: &Path) -> Result<LoadedImage> {
    let mut img = image::open(path)?;
    let (max_width, max_height) = MAX_IMAGE_PIXELS;
    let (width, height) = img.dimensions();
    if width > max_width || height > max_height {
        img = img.thumbnail(max_width, max_height);
    }

    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(LoadedImage {
        width,
        height,
        data: deflate(rgb.as_raw())?,
    })
}

pub struct ExportService;

impl ExportService {
    /// Renders every record, in the given order, into a PDF document.
    pub fn generate_pdf(messages: &[Message]) -> Result<Vec<u8>> {
        let mut images: HashMap<usize, LoadedImage> = HashMap::new();
        let mut entries = Vec::with_capacity(messages.len());

        for (idx, msg) in messages.iter().enumerate() {
            if let Some(path) = msg.file_path.as_deref() {
                match load_image(Path::new(path)) {
                    Ok(img) => {
                        images.insert(idx, img);
                    }
                    Err(e) => {
                        tracing::warn!(record_id = msg.id, path, error = %e, "Skipping image in export")
                    }
                }
            }

            entries.push(ExportEntry {
                header: format!(
                    "Chat ID: {}, Timestamp: {}",
                    msg.chat_id,
                    msg.timestamp.format("%Y-%m-%d %H:%M:%S")
                ),
                lines: msg
                    .message
                    .as_deref()
                    .map(|t| wrap_text(t, WRAP_WIDTH))
                    .unwrap_or_default(),
                image_size: images.get(&idx).map(|img| (img.width, img.height)),
            });
        }

        let pages = layout(&entries);
        tracing::info!(records = messages.len(), pages = pages.len(), "Rendering chat history");
        render(&pages, images)
    }
}

fn render(pages: &[Page], images: HashMap<usize, LoadedImage>) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut image_ids: HashMap<usize, ObjectId> = HashMap::new();
    for (entry, img) in images {
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(img.width),
                "Height" => i64::from(img.height),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8_i64,
                "Filter" => "FlateDecode",
            },
            img.data,
        );
        image_ids.insert(entry, doc.add_object(stream));
    }

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in pages {
        let mut operations = Vec::new();
        let mut xobjects = Dictionary::new();

        for op in &page.ops {
            match op {
                DrawOp::Text { x, y, text } => {
                    operations.push(Operation::new("BT", vec![]));
                    operations.push(Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]));
                    operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
                    operations.push(Operation::new(
                        "Tj",
                        vec![Object::string_literal(to_win_ansi(text))],
                    ));
                    operations.push(Operation::new("ET", vec![]));
                }
                DrawOp::Image {
                    entry,
                    x,
                    y,
                    width,
                    height,
                } => {
                    let Some(&image_id) = image_ids.get(entry) else {
                        continue;
                    };
                    let name = format!("Im{}", entry);
                    xobjects.set(name.clone(), image_id);
                    operations.push(Operation::new("q", vec![]));
                    operations.push(Operation::new(
                        "cm",
                        vec![
                            (*width).into(),
                            0_i64.into(),
                            0_i64.into(),
                            (*height).into(),
                            (*x).into(),
                            (*y).into(),
                        ],
                    ));
                    operations.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
                    operations.push(Operation::new("Q", vec![]));
                }
            }
        }

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
                "XObject" => xobjects,
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0_i64.into(), 0_i64.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Encodes text for the WinAnsiEncoding font; anything cp1252 cannot
/// represent, control characters included, becomes `?`.
fn to_win_ansi(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut buf = [0u8; 4];
    for c in text.chars() {
        if c.is_control() {
            out.push(b'?');
            continue;
        }
        let (bytes, _, unmappable) = WINDOWS_1252.encode(c.encode_utf8(&mut buf));
        match bytes.as_ref() {
            [byte] if !unmappable => out.push(*byte),
            _ => out.push(b'?'),
        }
    }
    out
}
