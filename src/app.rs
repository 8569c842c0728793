//! Interactive front end: target prompt, spinning globe, probe output panel

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use crossterm::style::Color;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::canvas::BrailleCanvas;
use crate::config::GlobeSettings;
use crate::geo::GeoCoordinate;
use crate::globe::geometry::BoundarySet;
use crate::globe::projector::Orientation;
use crate::globe::renderer::GlobeRenderer;
use crate::terminal::Terminal;
use crate::trace::{TraceEvent, TraceHandle, TraceOrchestrator};

const OUTPUT_ROWS: u16 = 8;
const OUTPUT_KEEP: usize = 500;
const KEY_ROTATE_STEP: f64 = 0.1;

const HELP: &str = "Enter trace · drag/arrows rotate · wheel/PgUp/PgDn zoom · Esc quit";

#[derive(Clone, Debug, PartialEq)]
enum Status {
    Ready,
    Running,
    Complete,
    Failed(String),
}

pub struct App {
    orchestrator: Arc<TraceOrchestrator>,
    renderer: GlobeRenderer,
    boundaries: BoundarySet,
    orientation: Orientation,
    auto_rotate: f64,
    tick: Duration,
    trace: Vec<GeoCoordinate>,
    output: VecDeque<String>,
    input: String,
    status: Status,
    running: Option<TraceHandle>,
    pointer: Option<(u16, u16)>,
}

impl App {
    pub fn new(
        orchestrator: Arc<TraceOrchestrator>,
        boundaries: BoundarySet,
        settings: &GlobeSettings,
    ) -> Self {
        Self {
            orchestrator,
            renderer: GlobeRenderer::default(),
            boundaries,
            orientation: Orientation::from_degrees(settings.initial_pitch_deg, settings.initial_yaw_deg),
            auto_rotate: settings.auto_rotate,
            tick: Duration::from_millis(settings.tick_ms.max(1)),
            trace: Vec::new(),
            output: VecDeque::new(),
            input: String::new(),
            status: Status::Ready,
            running: None,
            pointer: None,
        }
    }

    /// Main loop. Returns when the user quits.
    pub fn run(mut self, initial_target: Option<String>) -> io::Result<()> {
        let mut term = Terminal::new()?;
        let (w, h) = term.size();
        let mut canvas = BrailleCanvas::new(w as usize, globe_rows(h) as usize);

        if let Some(target) = initial_target {
            self.input = target;
            self.start_trace();
        }

        loop {
            let deadline = Instant::now() + self.tick;
            while let Some(event) = term.next_event(deadline.saturating_duration_since(Instant::now()))? {
                if let Event::Resize(width, height) = event {
                    term.resize(width, height);
                    term.clear_screen()?;
                    continue;
                }
                if self.handle_event(event) {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    break;
                }
            }

            self.poll_trace();
            self.orientation.auto_rotate(self.auto_rotate);

            let (w, h) = term.size();
            canvas.resize(w as usize, globe_rows(h) as usize);
            self.draw(&mut term, &mut canvas);
            term.present()?;
        }
    }

    /// Returns true when the user asked to quit
    fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key),
            Event::Mouse(mouse) => {
                self.handle_mouse(mouse);
                false
            }
            _ => false,
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Esc => return true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Enter => self.start_trace(),
            KeyCode::Left => self.orientation.rotate_yaw(-KEY_ROTATE_STEP),
            KeyCode::Right => self.orientation.rotate_yaw(KEY_ROTATE_STEP),
            KeyCode::Up => self.orientation.rotate_pitch(KEY_ROTATE_STEP),
            KeyCode::Down => self.orientation.rotate_pitch(-KEY_ROTATE_STEP),
            KeyCode::PageUp => self.orientation.scroll(-1.0),
            KeyCode::PageDown => self.orientation.scroll(1.0),
            // The prompt is locked while a trace runs
            KeyCode::Backspace if self.running.is_none() => {
                self.input.pop();
            }
            KeyCode::Char(c) if self.running.is_none() => self.input.push(c),
            _ => {}
        }
        false
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                self.pointer = Some((mouse.column, mouse.row));
                self.orientation.begin_drag();
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                if let Some((col, row)) = self.pointer {
                    // one cell is 2x4 braille dots
                    let dx = (mouse.column as f64 - col as f64) * 2.0;
                    let dy = (mouse.row as f64 - row as f64) * 4.0;
                    self.orientation.drag(dx, dy);
                }
                self.pointer = Some((mouse.column, mouse.row));
                self.orientation.begin_drag();
            }
            MouseEventKind::Up(MouseButton::Left) => {
                self.pointer = None;
                self.orientation.end_drag();
            }
            MouseEventKind::ScrollUp => self.orientation.scroll(-1.0),
            MouseEventKind::ScrollDown => self.orientation.scroll(1.0),
            _ => {}
        }
    }

    fn start_trace(&mut self) {
        if self.running.is_some() {
            return;
        }
        let target = self.input.trim().to_string();
        if target.is_empty() {
            self.status = Status::Failed("Please enter a domain name or IP address.".into());
            return;
        }

        self.trace.clear();
        self.output.clear();
        self.push_output(format!("Starting traceroute for {target}..."));
        self.push_output("This may take a moment.".into());
        self.push_output(String::new());

        match self.orchestrator.spawn(target) {
            Ok(handle) => {
                self.running = Some(handle);
                self.status = Status::Running;
            }
            Err(e) => self.status = Status::Failed(format!("could not start trace: {e}")),
        }
    }

    fn poll_trace(&mut self) {
        let Some(handle) = self.running.as_mut() else {
            return;
        };
        for event in handle.poll() {
            match event {
                TraceEvent::Line(line) => self.push_output(line),
                TraceEvent::Stage(stage) => {
                    self.push_output(String::new());
                    self.push_output(stage.to_string());
                }
                TraceEvent::Finished(Ok(coords)) => {
                    info!(hops = coords.len(), "showing trace");
                    self.trace = coords;
                    self.status = Status::Complete;
                }
                TraceEvent::Finished(Err(e)) => {
                    let msg = e.to_string();
                    self.push_output(String::new());
                    for line in msg.lines() {
                        self.push_output(format!("Error: {line}"));
                    }
                    self.status = Status::Failed(msg.lines().next().unwrap_or_default().to_string());
                }
            }
        }
        if self.running.as_ref().is_some_and(TraceHandle::is_finished) {
            self.running = None;
        }
    }

    fn push_output(&mut self, line: String) {
        if self.output.len() == OUTPUT_KEEP {
            self.output.pop_front();
        }
        self.output.push_back(line);
    }

    fn draw(&self, term: &mut Terminal, canvas: &mut BrailleCanvas) {
        let (width, height) = term.size();
        term.clear();

        // prompt line
        let prompt = format!(" Domain or IP Address: {}", self.input);
        term.set_str(0, 0, &prompt, Some(Color::White), true);
        if self.running.is_none() {
            term.set(prompt.chars().count() as i32, 0, '█', Some(Color::Grey), false);
        }
        let (label, color) = match &self.status {
            Status::Ready => ("Ready".to_string(), Color::DarkGrey),
            Status::Running => ("Running traceroute...".to_string(), Color::Yellow),
            Status::Complete => ("Complete".to_string(), Color::Green),
            Status::Failed(msg) => (msg.clone(), Color::Red),
        };
        let label_x = width as i32 - label.chars().count() as i32 - 1;
        term.set_str(label_x.max(prompt.chars().count() as i32 + 2), 0, &label, Some(color), false);

        // globe
        let commands = self
            .renderer
            .render(&self.boundaries, &self.trace, &self.orientation, canvas.viewport());
        canvas.paint(&commands);
        canvas.blit(term, 0, 1);

        // output panel
        let panel_top = 1 + globe_rows(height) as i32;
        let title = "─ Traceroute Output ";
        let rule: String = title.chars().chain(std::iter::repeat('─')).take(width as usize).collect();
        term.set_str(0, panel_top, &rule, Some(Color::DarkGrey), false);

        let visible = OUTPUT_ROWS.min(height.saturating_sub(panel_top as u16 + 2)) as usize;
        let skip = self.output.len().saturating_sub(visible);
        for (i, line) in self.output.iter().skip(skip).enumerate() {
            let color = if line.starts_with("Error:") { Color::Red } else { Color::Grey };
            let clipped: String = line.chars().take(width as usize).collect();
            term.set_str(0, panel_top + 1 + i as i32, &clipped, Some(color), false);
        }

        term.set_str(0, height as i32 - 1, HELP, Some(Color::DarkGrey), false);
    }
}

/// Rows left for the globe after prompt, panel rule, output and help line
fn globe_rows(height: u16) -> u16 {
    height.saturating_sub(OUTPUT_ROWS + 3).max(1)
}
