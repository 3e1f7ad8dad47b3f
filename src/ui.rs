use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{
    self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
    MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};

use crate::app::Page;
use crate::context::Composer;
use crate::dom::{self, EventKind, NodeId};
use crate::layout::{
    self as page_layout, Preview, COLOR_BG, COLOR_BORDER_FOCUSED, COLOR_PANEL_BG,
    COLOR_PANEL_FOCUSED_BG, COLOR_TEXT_PRIMARY, COLOR_TEXT_SECONDARY,
};

const TICK_RATE: Duration = Duration::from_millis(120);
const MOUSE_SCROLL_ROWS: i32 = 3;

pub struct Model {
    page: Page,
    anchors: Vec<NodeId>,
    focus: Option<NodeId>,
    hovered: Option<NodeId>,
    status_message: String,
    last_status: String,
    last_title: String,
    needs_redraw: bool,
}

impl Model {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            anchors: Vec::new(),
            focus: None,
            hovered: None,
            status_message: String::new(),
            last_status: String::new(),
            last_title: String::new(),
            needs_redraw: true,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableFocusChange)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        if let Some(watcher) = &self.page.watcher {
            watcher.borrow_mut().stop();
        }
        self.page.thread_view.unbind();

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableFocusChange)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();

        loop {
            if self.tick() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
                self.sync_title(terminal)?;
            }

            let timeout = TICK_RATE
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                                self.mark_dirty();
                            }
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::FocusGained => self.page.context.visibility.set_visible(true),
                    Event::FocusLost => self.page.context.visibility.set_visible(false),
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= TICK_RATE {
                last_tick = Instant::now();
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    /// Lets the watcher drain responses and fire deadlines. Returns whether
    /// anything on screen changed.
    fn tick(&mut self) -> bool {
        if let Some(watcher) = &self.page.watcher {
            if let Ok(mut watcher) = watcher.try_borrow_mut() {
                watcher.tick();
            }
        }
        let status = self.status_line();
        if status != self.last_status {
            self.last_status = status;
            return true;
        }
        false
    }

    fn sync_title(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let title = self.page.document().borrow().title().to_string();
        if title != self.last_title {
            terminal.backend_mut().execute(SetTitle(&title))?;
            self.last_title = title;
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Esc => {
                if !self.page.draft.is_visible() {
                    return Ok(true);
                }
                self.page.draft.hide();
            }
            KeyCode::Char('j') | KeyCode::Down => self.scroll_by(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_by(-1),
            KeyCode::PageDown | KeyCode::Char(' ') => self.scroll_by(self.page_height()),
            KeyCode::PageUp => self.scroll_by(-self.page_height()),
            KeyCode::Char('G') | KeyCode::End => self.scroll_to(i32::MAX),
            KeyCode::Char('g') | KeyCode::Home => self.scroll_to(0),
            KeyCode::Tab => self.move_focus(1),
            KeyCode::BackTab => self.move_focus(-1),
            KeyCode::Enter => self.activate(),
            KeyCode::Char('u') => self.force_update(),
            KeyCode::Char('r') => self.page.draft.show(),
            KeyCode::Char('x') => self.page.draft.clear(),
            _ => return Ok(false),
        }
        self.mark_dirty();
        Ok(false)
    }

    fn handle_mouse(&mut self, event: MouseEvent) {
        match event.kind {
            MouseEventKind::ScrollDown => self.scroll_by(MOUSE_SCROLL_ROWS),
            MouseEventKind::ScrollUp => self.scroll_by(-MOUSE_SCROLL_ROWS),
            _ => return,
        }
        self.mark_dirty();
    }

    fn page_height(&self) -> i32 {
        self.page.document().borrow().viewport().height.max(1)
    }

    fn scroll_by(&mut self, delta: i32) {
        let top = self.page.document().borrow().viewport().scroll_top;
        self.scroll_to(top.saturating_add(delta));
    }

    fn scroll_to(&mut self, top: i32) {
        self.page.document().borrow_mut().scroll_to(top);
        self.after_scroll();
    }

    fn after_scroll(&mut self) {
        if let Some(watcher) = &self.page.watcher {
            if let Ok(mut watcher) = watcher.try_borrow_mut() {
                watcher.on_scroll();
            }
        }
    }

    fn move_focus(&mut self, step: isize) {
        if self.anchors.is_empty() {
            return;
        }
        let len = self.anchors.len() as isize;
        let current = self
            .focus
            .and_then(|focus| self.anchors.iter().position(|anchor| *anchor == focus));
        let next = match current {
            Some(index) => (index as isize + step).rem_euclid(len),
            None if step >= 0 => 0,
            None => len - 1,
        } as usize;
        let target = self.anchors[next];

        self.ensure_visible(target);
        self.focus = Some(target);
        self.set_hover(Some(target));
    }

    fn ensure_visible(&mut self, node: NodeId) {
        let target = {
            let doc = self.page.document().borrow();
            match doc.rect(node) {
                Some(rect) if !doc.is_in_viewport(node) => Some(rect.top - doc.viewport().height / 3),
                _ => None,
            }
        };
        if let Some(top) = target {
            self.scroll_to(top.max(0));
        }
    }

    /// Moves the pointer-hover state, sending mouse-out to the old anchor
    /// before mouse-over reaches the new one.
    fn set_hover(&mut self, node: Option<NodeId>) {
        let document = self.page.document().clone();
        if let Some(previous) = self.hovered.take() {
            dom::dispatch(&document, dom::Event::new(EventKind::MouseOut, previous));
        }
        if let Some(node) = node {
            dom::dispatch(&document, dom::Event::new(EventKind::MouseOver, node));
            self.hovered = Some(node);
        }
    }

    fn activate(&mut self) {
        let Some(node) = self.focus else {
            return;
        };
        let document = self.page.document().clone();
        dom::dispatch(&document, dom::Event::new(EventKind::Click, node));
        self.after_scroll();
    }

    fn force_update(&mut self) {
        match &self.page.watcher {
            Some(watcher) => {
                if let Ok(mut watcher) = watcher.try_borrow_mut() {
                    watcher.force_update();
                }
                self.status_message.clear();
            }
            None => self.status_message = "Thread is locked.".to_string(),
        }
    }

    fn status_line(&self) -> String {
        let doc = self.page.document().borrow();
        let status = doc.text_content(self.page.status);
        if self.status_message.is_empty() {
            format!("{}  [{}]", doc.title(), status)
        } else {
            format!("{}  [{}]  {}", doc.title(), status, self.status_message)
        }
    }

    fn footer_text(&self) -> String {
        if self.page.draft.is_visible() {
            let draft = self.page.draft.text().replace('\n', " ");
            return format!("Reply: {}  · x clear · Esc close", draft.trim_end());
        }
        "j/k scroll · Tab/Shift-Tab move focus · Enter open · u update · r reply · G bottom · q quit"
            .to_string()
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);
        let area = chunks[1];

        let (block, preview, scroll_top) = {
            let document = self.page.document().clone();
            let mut doc = document.borrow_mut();
            doc.set_viewport_size(area.width as i32, area.height as i32);
            let block = page_layout::layout_page(&mut doc, area.width as usize, self.focus);
            let preview = page_layout::layout_preview(&mut doc, self.focus);
            let scroll_top = doc.viewport().scroll_top;
            (block, preview, scroll_top)
        };
        self.anchors = block.anchors.clone();
        // Ids of removed anchors may have been handed to new nodes.
        if self.focus.is_some_and(|node| !self.anchors.contains(&node)) {
            self.focus = None;
        }
        if self.hovered.is_some_and(|node| !self.anchors.contains(&node)) {
            self.hovered = None;
        }

        let status_line = Paragraph::new(self.status_line()).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, chunks[0]);

        let scroll = scroll_top.clamp(0, u16::MAX as i32) as u16;
        let posts = Paragraph::new(block.into_text())
            .style(Style::default().fg(COLOR_TEXT_PRIMARY))
            .scroll((scroll, 0));
        frame.render_widget(posts, area);

        if let Some(preview) = preview {
            self.draw_preview(frame, area, scroll_top, preview);
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, chunks[2]);
    }

    fn draw_preview(&self, frame: &mut Frame<'_>, area: Rect, scroll_top: i32, preview: Preview) {
        let x = area.x as i32 + preview.area.left;
        let y = area.y as i32 + preview.area.top - scroll_top;
        let popup = Rect::new(
            x.max(0) as u16,
            y.max(area.y as i32) as u16,
            preview.area.width.max(0) as u16,
            preview.area.height.max(0) as u16,
        )
        .intersection(area);
        if popup.width == 0 || popup.height == 0 {
            return;
        }
        frame.render_widget(Clear, popup);
        let widget = Paragraph::new(preview.block.into_text()).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
                .style(Style::default().bg(COLOR_PANEL_BG)),
        );
        frame.render_widget(widget, popup);
    }
}
