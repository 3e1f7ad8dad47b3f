//! Toggling file thumbnails between thumbnail and full size.

use crate::dom::{Document, NodeId};

/// Pixels per terminal cell, used to measure the viewport against image
/// dimensions.
pub const CELL_WIDTH: u32 = 8;
pub const CELL_HEIGHT: u32 = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageExpansion;

impl ImageExpansion {
    pub fn new() -> Self {
        Self
    }

    /// Expands or restores the image inside a `.file` block. Returns whether
    /// the image is now expanded.
    pub fn toggle(&self, doc: &mut Document, container: NodeId) -> bool {
        let (Some(link), Some(image)) = (
            doc.first_by_tag(container, "a"),
            doc.first_by_tag(container, "img"),
        ) else {
            tracing::debug!(?container, "file block without link or image");
            return false;
        };

        if doc.data(link, "expanded") == Some("true") {
            self.close(doc, link, image);
            false
        } else {
            self.expand(doc, link, image);
            true
        }
    }

    fn expand(&self, doc: &mut Document, link: NodeId, image: NodeId) {
        if doc.data(link, "thumbnail").is_none() {
            let src = doc.attr(image, "src").unwrap_or_default().to_string();
            let width = doc.attr(image, "width").unwrap_or("0").to_string();
            let height = doc.attr(image, "height").unwrap_or("0").to_string();
            doc.set_data(link, "thumbnail", src);
            doc.set_data(link, "thumbnailwidth", width);
            doc.set_data(link, "thumbnailheight", height);
        }

        let number = |value: Option<&str>| value.and_then(|v| v.parse::<u32>().ok()).unwrap_or_default();
        let file_width = number(doc.data(link, "filewidth"));
        let file_height = number(doc.data(link, "fileheight"));

        let viewport = doc.viewport();
        let available_width = viewport.width.max(0) as u32 * CELL_WIDTH;
        let available_height = viewport.height.max(0) as u32 * CELL_HEIGHT;
        let (width, height) = fit(file_width, file_height, available_width, available_height);

        let href = doc.attr(link, "href").unwrap_or_default().to_string();
        doc.set_data(link, "expanded", "true");
        doc.set_attr(image, "src", href);
        doc.set_attr(image, "width", width.to_string());
        doc.set_attr(image, "height", height.to_string());

        // Pull the image back to the left edge when it would overflow.
        let left = doc.rect(image).map(|rect| rect.left.max(0) as u32).unwrap_or(0);
        let margin = if width > available_width.saturating_sub(left * CELL_WIDTH) {
            -(left as i64)
        } else {
            0
        };
        doc.set_data(image, "margin-left", margin.to_string());
    }

    fn close(&self, doc: &mut Document, link: NodeId, image: NodeId) {
        let src = doc.data(link, "thumbnail").unwrap_or_default().to_string();
        let width = doc.data(link, "thumbnailwidth").unwrap_or("0").to_string();
        let height = doc.data(link, "thumbnailheight").unwrap_or("0").to_string();
        doc.set_attr(image, "src", src);
        doc.set_attr(image, "width", width);
        doc.set_attr(image, "height", height);
        doc.set_data(image, "margin-left", "0");
        doc.set_data(link, "expanded", "false");
    }
}

/// Scales `width`x`height` down to fit the available box, keeping the
/// aspect ratio. Images that already fit are left alone.
pub fn fit(width: u32, height: u32, available_width: u32, available_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || (width <= available_width && height <= available_height) {
        return (width, height);
    }
    let ratio = f64::min(
        available_width as f64 / width as f64,
        available_height as f64 / height as f64,
    );
    (
        (width as f64 * ratio).floor() as u32,
        (height as f64 * ratio).floor() as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_block(doc: &mut Document) -> (NodeId, NodeId, NodeId) {
        let container = doc.create_element("div");
        doc.add_class(container, "file");
        let link = doc.create_element("a");
        doc.add_class(link, "file-link");
        doc.set_attr(link, "href", "/media/full.png");
        doc.set_data(link, "filewidth", "1600");
        doc.set_data(link, "fileheight", "800");
        let image = doc.create_element("img");
        doc.set_attr(image, "src", "/media/thumb.png");
        doc.set_attr(image, "width", "160");
        doc.set_attr(image, "height", "80");
        doc.append_child(link, image);
        doc.append_child(container, link);
        (container, link, image)
    }

    #[test]
    fn fit_keeps_aspect_ratio() {
        assert_eq!(fit(1600, 800, 800, 800), (800, 400));
        assert_eq!(fit(100, 50, 800, 800), (100, 50));
        assert_eq!(fit(0, 50, 10, 10), (0, 50));
    }

    #[test]
    fn toggle_expands_and_restores_thumbnail() {
        let mut doc = Document::new();
        doc.set_viewport_size(100, 40);
        let (container, link, image) = file_block(&mut doc);
        let expansion = ImageExpansion::new();

        assert!(expansion.toggle(&mut doc, container));
        assert_eq!(doc.attr(image, "src"), Some("/media/full.png"));
        assert_eq!(doc.attr(image, "width"), Some("800"));
        assert_eq!(doc.attr(image, "height"), Some("400"));
        assert_eq!(doc.data(link, "thumbnail"), Some("/media/thumb.png"));

        assert!(!expansion.toggle(&mut doc, container));
        assert_eq!(doc.attr(image, "src"), Some("/media/thumb.png"));
        assert_eq!(doc.attr(image, "width"), Some("160"));
        assert_eq!(doc.data(link, "expanded"), Some("false"));
    }
}
