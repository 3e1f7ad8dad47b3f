//! Lays the page document out as terminal rows.
//!
//! Every element that gets drawn receives a rect in document coordinates
//! (rows from the top of the page, columns from the left edge), which is what
//! the hover logic measures against the viewport.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use unicode_width::UnicodeWidthChar;

use crate::dom::{Document, NodeId, NodeKind, Rect};

pub const HOVER_CONTAINER_ID: &str = "hovering-post-container";
pub const PREVIEW_MAX_WIDTH: i32 = 72;
const PREVIEW_MIN_WIDTH: i32 = 24;

pub const COLOR_BG: Color = Color::Rgb(30, 30, 46);
pub const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
pub const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
pub const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
pub const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
pub const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
pub const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
pub const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
pub const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
pub const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

/// Rows produced for one subtree, plus what was placed where.
#[derive(Debug, Default)]
pub struct Block {
    pub lines: Vec<Line<'static>>,
    pub rects: Vec<(NodeId, Rect)>,
    /// Anchors the keyboard focus can land on, in document order.
    pub anchors: Vec<NodeId>,
}

impl Block {
    pub fn height(&self) -> i32 {
        self.lines.len() as i32
    }

    pub fn into_text(self) -> Text<'static> {
        Text::from(self.lines)
    }
}

#[derive(Debug)]
pub struct Preview {
    pub area: Rect,
    pub block: Block,
}

struct Writer<'a> {
    doc: &'a Document,
    width: usize,
    focus: Option<NodeId>,
    lines: Vec<Vec<Span<'static>>>,
    row: usize,
    col: usize,
    rects: Vec<(NodeId, Rect)>,
    anchors: Vec<NodeId>,
}

impl<'a> Writer<'a> {
    fn new(doc: &'a Document, width: usize, focus: Option<NodeId>) -> Self {
        Self {
            doc,
            width: width.max(1),
            focus,
            lines: vec![Vec::new()],
            row: 0,
            col: 0,
            rects: Vec::new(),
            anchors: Vec::new(),
        }
    }

    fn finish(mut self) -> Block {
        if self.lines.last().is_some_and(Vec::is_empty) && self.lines.len() > 1 {
            self.lines.pop();
        }
        Block {
            lines: self.lines.into_iter().map(Line::from).collect(),
            rects: self.rects,
            anchors: self.anchors,
        }
    }

    fn newline(&mut self) {
        self.lines.push(Vec::new());
        self.row += 1;
        self.col = 0;
    }

    fn break_line(&mut self) {
        if self.col > 0 {
            self.newline();
        }
    }

    fn flush(&mut self, buffer: &mut String, style: Style) {
        if !buffer.is_empty() {
            self.lines[self.row].push(Span::styled(std::mem::take(buffer), style));
        }
    }

    fn push(&mut self, text: &str, style: Style) {
        let mut buffer = String::new();
        for ch in text.chars() {
            if ch == '\n' {
                self.flush(&mut buffer, style);
                self.newline();
                continue;
            }
            let width = ch.width().unwrap_or(0);
            if self.col + width > self.width && self.col > 0 {
                self.flush(&mut buffer, style);
                self.newline();
                if ch == ' ' {
                    continue;
                }
            }
            buffer.push(ch);
            self.col += width;
        }
        self.flush(&mut buffer, style);
    }

    fn separator(&mut self) {
        self.break_line();
        let rule = "─".repeat(self.width.min(40));
        self.lines[self.row].push(Span::styled(rule, Style::default().fg(COLOR_PANEL_SELECTED_BG)));
        self.newline();
    }

    fn node(&mut self, node: NodeId, style: Style) {
        let doc = self.doc;
        match doc.kind(node) {
            NodeKind::Text(text) => {
                let in_body = doc
                    .parent(node)
                    .is_some_and(|parent| doc.has_class(parent, "text"));
                let style = if in_body && text.starts_with('>') {
                    style.fg(COLOR_SUCCESS)
                } else {
                    style
                };
                self.push(text, style);
            }
            NodeKind::Element(_) => self.element(node, style),
        }
    }

    fn element(&mut self, node: NodeId, inherited: Style) {
        let doc = self.doc;
        let tag = doc.tag(node).unwrap_or_default();
        if doc.element_id(node) == Some(HOVER_CONTAINER_ID) || tag == "input" {
            return;
        }
        let block = tag == "div";
        if block {
            self.break_line();
        }

        let style = self.style_for(node, inherited);
        let start = (self.row, self.col);
        match tag {
            "br" => self.newline(),
            "img" => {
                let label = format!(
                    "[image {}x{}]",
                    doc.attr(node, "width").unwrap_or("?"),
                    doc.attr(node, "height").unwrap_or("?")
                );
                self.push(&label, style);
            }
            _ => {
                for child in doc.children(node).to_vec() {
                    self.node(child, style);
                }
            }
        }
        let end = (self.row, self.col);

        if is_focusable(doc, node) {
            self.anchors.push(node);
        }
        if tag != "br" {
            self.rects.push((node, self.rect_between(start, end)));
        }

        if block {
            self.break_line();
            if doc.has_class(node, "divider") {
                self.separator();
            }
        }
    }

    fn rect_between(&self, start: (usize, usize), end: (usize, usize)) -> Rect {
        if start.0 == end.0 {
            Rect::new(start.0 as i32, start.1 as i32, (end.1 - start.1) as i32, 1)
        } else {
            let tail = usize::from(end.1 > 0);
            Rect::new(
                start.0 as i32,
                0,
                self.width as i32,
                (end.0 - start.0 + tail) as i32,
            )
        }
    }

    fn style_for(&self, node: NodeId, inherited: Style) -> Style {
        let doc = self.doc;
        let mut style = inherited;
        if doc.has_class(node, "highlight") {
            style = style.bg(COLOR_PANEL_SELECTED_BG);
        }
        for class in doc.classes(node) {
            style = match class.as_str() {
                "subject" => style.fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
                "name" => style.fg(COLOR_SUCCESS).add_modifier(Modifier::BOLD),
                "trip" => style.fg(COLOR_TEXT_SECONDARY).remove_modifier(Modifier::BOLD),
                "modcode" => style.fg(COLOR_ERROR).add_modifier(Modifier::BOLD),
                "date" | "watch-status" => style.fg(COLOR_TEXT_SECONDARY),
                "refno" => style.fg(COLOR_ACCENT),
                "rquote" | "backref" => style.fg(COLOR_ACCENT).add_modifier(Modifier::UNDERLINED),
                "watch-update" => style.fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
                _ => style,
            };
        }
        if doc.tag(node) == Some("img") {
            style = style.fg(COLOR_TEXT_SECONDARY);
        }
        if self.focus == Some(node) {
            style = style.add_modifier(Modifier::REVERSED);
        }
        style
    }
}

fn is_focusable(doc: &Document, node: NodeId) -> bool {
    match doc.tag(node) {
        Some("a") => ["refno", "rquote", "backref", "watch-update"]
            .iter()
            .any(|class| doc.has_class(node, class)),
        Some("img") => true,
        _ => false,
    }
}

fn base_style() -> Style {
    Style::default().fg(COLOR_TEXT_PRIMARY)
}

/// Lays out `node`'s subtree at the given width without touching geometry.
pub fn layout_block(doc: &Document, node: NodeId, width: usize, focus: Option<NodeId>) -> Block {
    let mut writer = Writer::new(doc, width, focus);
    writer.element(node, base_style());
    writer.finish()
}

/// Lays out the body (minus the floating preview container), stores every
/// rect and the scroll height, and returns the rows.
pub fn layout_page(doc: &mut Document, width: usize, focus: Option<NodeId>) -> Block {
    let block = {
        let mut writer = Writer::new(doc, width, focus);
        for child in doc.children(doc.body()).to_vec() {
            writer.node(child, base_style());
        }
        writer.finish()
    };
    for (node, rect) in &block.rects {
        doc.set_rect(*node, *rect);
    }
    doc.set_scroll_height(block.height());
    block
}

/// Lays out the floating preview, if one is showing, next to the anchor the
/// binder recorded on it and kept inside the viewport.
pub fn layout_preview(doc: &mut Document, focus: Option<NodeId>) -> Option<Preview> {
    let container = doc.get_element_by_id(HOVER_CONTAINER_ID)?;
    let preview = doc.last_element_child(container)?;
    let viewport = doc.viewport();

    let number = |key: &str| doc.data(preview, key).and_then(|value| value.parse::<i32>().ok());
    let anchor_row = number("anchor-row").unwrap_or(viewport.scroll_top);
    let anchor_col = number("anchor-col").unwrap_or(0);

    let width = PREVIEW_MAX_WIDTH
        .min(viewport.width - anchor_col)
        .max(PREVIEW_MIN_WIDTH)
        .min(viewport.width.max(3));
    let block = layout_block(doc, preview, (width - 2).max(1) as usize, focus);
    let height = (block.height() + 2).min(viewport.height.max(3));

    let mut top = anchor_row - height / 2;
    let lowest = viewport.scroll_top + viewport.height - height;
    top = top.min(lowest).max(viewport.scroll_top);
    let left = anchor_col.min(viewport.width - width).max(0);

    for (node, rect) in &block.rects {
        doc.set_rect(
            *node,
            Rect::new(rect.top + top + 1, rect.left + left + 1, rect.width, rect.height),
        );
    }
    doc.set_rect(preview, Rect::new(top, left, width, height));

    Some(Preview {
        area: Rect::new(top, left, width, height),
        block,
    })
}
