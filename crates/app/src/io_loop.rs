//! The endpoint input/output loop.
//!
//! One cooperative iteration per tick: drain every pending terminal event,
//! forward recognized DTMF symbols to the sink, redraw the keypad, then
//! yield once. Playback submissions go to the dedicated playback thread and
//! never block an iteration.

use std::collections::VecDeque;
use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
    MouseButton, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};

use crate::keypad::{self, DtmfKey, KeyButton};
use tonedial_audio::{PcmAudio, PlaybackHandle, PlaybackSnapshot, PlaybackThread};
use tonedial_foundation::{AppError, ShutdownFlag, UiError};

/// Consumer-provided DTMF sink. Called synchronously from the loop, once
/// per recognized key; a failing sink loses that one key, never the loop.
pub type DtmfSink = Box<dyn FnMut(DtmfKey) -> anyhow::Result<()> + Send>;

/// Options for starting the endpoint loop.
#[derive(Clone, Debug)]
pub struct EndpointOptions {
    /// Rate the device is warmed up at before the first playback request.
    pub sample_rate: u32,
    /// `false` is the keyboard-only degraded mode: raw key input, no
    /// alternate screen, no pointer.
    pub show_window: bool,
    /// Output device name; `None` uses the host default.
    pub device: Option<String>,
    pub title: String,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            show_window: true,
            device: None,
            title: "tonedial - DTMF keypad (click or type)".to_string(),
        }
    }
}

/// The single suspension point per iteration.
const TICK: Duration = Duration::from_millis(5);
const RECENT_KEYS: usize = 16;

/// Seam between the loop and the terminal event queue, in the same spirit
/// as the audio `OutputBackend` seam: the loop drains whatever source it
/// was built with, so tests can drive it without a TTY.
pub(crate) trait EventSource: Send {
    fn poll(&mut self, timeout: Duration) -> io::Result<bool>;
    fn read(&mut self) -> io::Result<Event>;
}

/// The real crossterm queue.
struct CrosstermEvents;

impl EventSource for CrosstermEvents {
    fn poll(&mut self, timeout: Duration) -> io::Result<bool> {
        event::poll(timeout)
    }

    fn read(&mut self) -> io::Result<Event> {
        event::read()
    }
}

/// Start the loop as a background task. All-or-nothing: if the terminal
/// cannot be acquired, the playback thread is torn down before the error
/// surfaces, and nothing stays half-initialized.
pub fn start(options: EndpointOptions, sink: DtmfSink) -> Result<EndpointHandle, AppError> {
    let (playback_thread, playback) = PlaybackThread::spawn(options.device.clone())?;

    let surface = match Surface::acquire(options.show_window) {
        Ok(s) => s,
        Err(e) => {
            playback_thread.stop();
            return Err(AppError::Ui(e));
        }
    };

    let buttons = match surface.size() {
        Some(area) => keypad::compute_layout(area),
        None => Vec::new(),
    };

    playback.warm_up(options.sample_rate);

    let stop = ShutdownFlag::new();
    let io_loop = IoLoop {
        title: options.title,
        surface,
        events: CrosstermEvents,
        buttons,
        sink,
        stop: stop.clone(),
        playback: playback.clone(),
        playback_thread: Some(playback_thread),
        hover: None,
        recent: VecDeque::with_capacity(RECENT_KEYS),
    };
    let task = tokio::spawn(io_loop.run());

    Ok(EndpointHandle {
        stop,
        playback,
        task,
    })
}

/// Handle to the running loop.
pub struct EndpointHandle {
    stop: ShutdownFlag,
    playback: PlaybackHandle,
    task: tokio::task::JoinHandle<()>,
}

impl EndpointHandle {
    /// Fire-and-forget playback through the reconciliation engine.
    pub fn play(&self, audio: PcmAudio) {
        self.playback.play(audio);
    }

    pub fn playback(&self) -> PlaybackHandle {
        self.playback.clone()
    }

    /// Request loop termination. Idempotent; the loop observes the flag at
    /// its next iteration boundary and releases its resources.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.stop.clone()
    }

    /// Wait for the loop to exit and release the terminal and device.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// What a key event means to the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Dtmf(DtmfKey),
    Quit,
    Ignore,
}

fn classify_key(code: KeyCode, modifiers: KeyModifiers) -> KeyAction {
    match code {
        KeyCode::Char(ch) => {
            if modifiers.contains(KeyModifiers::CONTROL) && matches!(ch, 'c' | 'C') {
                return KeyAction::Quit;
            }
            if let Some(key) = DtmfKey::from_char(ch) {
                return KeyAction::Dtmf(key);
            }
            if matches!(ch, 'q' | 'Q') {
                return KeyAction::Quit;
            }
            KeyAction::Ignore
        }
        KeyCode::Esc => KeyAction::Quit,
        _ => KeyAction::Ignore,
    }
}

/// The acquired terminal surface. Raw mode is always on while held (key
/// events need it); the alternate screen and mouse capture exist only in
/// window mode. `release` restores everything exactly once.
struct Surface {
    terminal: Option<Terminal<CrosstermBackend<Stdout>>>,
    released: bool,
}

impl Surface {
    fn acquire(show_window: bool) -> Result<Self, UiError> {
        enable_raw_mode().map_err(UiError::TerminalUnavailable)?;

        if !show_window {
            return Ok(Self {
                terminal: None,
                released: false,
            });
        }

        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen, EnableMouseCapture) {
            let _ = disable_raw_mode();
            return Err(UiError::TerminalUnavailable(e));
        }
        match Terminal::new(CrosstermBackend::new(stdout)) {
            Ok(terminal) => Ok(Self {
                terminal: Some(terminal),
                released: false,
            }),
            Err(e) => {
                let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
                let _ = disable_raw_mode();
                Err(UiError::TerminalUnavailable(e))
            }
        }
    }

    fn size(&self) -> Option<Rect> {
        let terminal = self.terminal.as_ref()?;
        let size = terminal.size().ok()?;
        Some(Rect::new(0, 0, size.width, size.height))
    }

    /// Restore the terminal. Returns whether this call did the work;
    /// every call after the first is a no-op.
    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        if let Some(mut terminal) = self.terminal.take() {
            let _ = disable_raw_mode();
            let _ = execute!(
                terminal.backend_mut(),
                LeaveAlternateScreen,
                DisableMouseCapture
            );
            let _ = terminal.show_cursor();
        } else {
            let _ = disable_raw_mode();
        }
        true
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.release();
    }
}

struct IoLoop<E: EventSource> {
    title: String,
    surface: Surface,
    events: E,
    buttons: Vec<KeyButton>,
    sink: DtmfSink,
    stop: ShutdownFlag,
    playback: PlaybackHandle,
    playback_thread: Option<PlaybackThread>,
    hover: Option<(u16, u16)>,
    recent: VecDeque<DtmfKey>,
}

impl<E: EventSource> IoLoop<E> {
    async fn run(mut self) {
        tracing::info!(
            window = self.surface.terminal.is_some(),
            "Endpoint loop started"
        );
        loop {
            if self.stop.is_triggered() {
                break;
            }
            // The iteration is atomic: full event drain, then one render,
            // then the single yield below.
            if let Err(e) = self.drain_events() {
                tracing::error!("Terminal event error: {}", e);
                self.stop.trigger();
            }
            self.render();
            tokio::time::sleep(TICK).await;
        }
        self.release();
        tracing::info!("Endpoint loop stopped");
    }

    fn drain_events(&mut self) -> io::Result<()> {
        while self.events.poll(Duration::ZERO)? {
            match self.events.read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    match classify_key(key.code, key.modifiers) {
                        KeyAction::Dtmf(k) => self.dispatch(k),
                        KeyAction::Quit => self.stop.trigger(),
                        KeyAction::Ignore => {}
                    }
                }
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::Down(MouseButton::Left) => {
                        if let Some(k) = keypad::hit_test(&self.buttons, mouse.column, mouse.row) {
                            self.dispatch(k);
                        }
                    }
                    MouseEventKind::Moved => {
                        self.hover = Some((mouse.column, mouse.row));
                    }
                    _ => {}
                },
                // Layout is fixed at start; resize is intentionally ignored
                _ => {}
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, key: DtmfKey) {
        let now = Instant::now();
        for button in &mut self.buttons {
            if button.key == key {
                button.press(now);
            }
        }
        if self.recent.len() == RECENT_KEYS {
            self.recent.pop_front();
        }
        self.recent.push_back(key);

        tracing::debug!(%key, "DTMF key accepted");
        if let Err(e) = (self.sink)(key) {
            tracing::warn!(%key, error = %e, "DTMF sink failed; key dropped");
        }
    }

    fn render(&mut self) {
        let Some(terminal) = self.surface.terminal.as_mut() else {
            return;
        };
        let now = Instant::now();
        let snapshot = self.playback.snapshot();
        let buttons = &self.buttons;
        let hover = self.hover;
        let recent = &self.recent;
        let title = self.title.as_str();

        if let Err(e) =
            terminal.draw(|f| draw_ui(f, title, buttons, hover, now, snapshot, recent))
        {
            tracing::error!("Terminal draw error: {}", e);
            self.stop.trigger();
        }
    }

    fn release(&mut self) {
        self.surface.release();
        if let Some(thread) = self.playback_thread.take() {
            thread.stop();
        }
    }
}

fn draw_ui(
    f: &mut Frame,
    title: &str,
    buttons: &[KeyButton],
    hover: Option<(u16, u16)>,
    now: Instant,
    snapshot: PlaybackSnapshot,
    recent: &VecDeque<DtmfKey>,
) {
    let area = f.area();

    let header = Paragraph::new(Line::from(title.to_string()))
        .style(Style::default().add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center);
    f.render_widget(header, Rect::new(area.x, area.y, area.width, 1));

    for button in buttons {
        draw_button(f, button, hover, now);
    }

    draw_status(f, area, buttons, snapshot, recent);
}

fn draw_button(f: &mut Frame, button: &KeyButton, hover: Option<(u16, u16)>, now: Instant) {
    let hovered = hover.is_some_and(|(c, r)| button.contains(c, r));

    let color = if button.is_pressed(now) {
        Color::Yellow
    } else if hovered {
        Color::Cyan
    } else {
        Color::Gray
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));
    f.render_widget(block, button.area);

    if button.area.height >= 3 && button.area.width >= 3 {
        let label_row = Rect::new(
            button.area.x + 1,
            button.area.y + button.area.height / 2,
            button.area.width - 2,
            1,
        );
        let label = Paragraph::new(button.key.to_string())
            .style(Style::default().fg(color).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center);
        f.render_widget(label, label_row);
    }
}

fn draw_status(
    f: &mut Frame,
    area: Rect,
    buttons: &[KeyButton],
    snapshot: PlaybackSnapshot,
    recent: &VecDeque<DtmfKey>,
) {
    let grid_bottom = buttons
        .iter()
        .map(|b| b.area.y + b.area.height)
        .max()
        .unwrap_or(area.y);
    if grid_bottom + 1 >= area.y + area.height {
        return;
    }
    let status_area = Rect::new(
        area.x,
        grid_bottom + 1,
        area.width,
        area.height - (grid_bottom + 1 - area.y),
    );

    let device_line = match snapshot.rate {
        Some(rate) => format!("Device: open @ {} Hz", rate),
        None => "Device: closed".to_string(),
    };
    let dialed: String = recent.iter().map(|k| k.as_char()).collect();

    let lines = vec![
        Line::from(device_line),
        Line::from(format!(
            "Clips: {} played, {} dropped, {} reconfigurations",
            snapshot.clips_played, snapshot.clips_dropped, snapshot.reconfigurations
        )),
        Line::from(format!("Dialed: {}", dialed)),
        Line::from("[q]/[Esc] quit"),
    ];

    let paragraph = Paragraph::new(lines).block(Block::default().borders(Borders::TOP));
    f.render_widget(paragraph, status_area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_classification_matches_the_symbol_set() {
        for ch in keypad::KEY_SYMBOLS {
            assert_eq!(
                classify_key(KeyCode::Char(ch), KeyModifiers::NONE),
                KeyAction::Dtmf(DtmfKey::from_char(ch).unwrap())
            );
        }
        assert_eq!(
            classify_key(KeyCode::Char('x'), KeyModifiers::NONE),
            KeyAction::Ignore
        );
        assert_eq!(
            classify_key(KeyCode::F(5), KeyModifiers::NONE),
            KeyAction::Ignore
        );
    }

    #[test]
    fn quit_keys_do_not_collide_with_dtmf() {
        assert_eq!(
            classify_key(KeyCode::Char('q'), KeyModifiers::NONE),
            KeyAction::Quit
        );
        assert_eq!(
            classify_key(KeyCode::Esc, KeyModifiers::NONE),
            KeyAction::Quit
        );
        assert_eq!(
            classify_key(KeyCode::Char('c'), KeyModifiers::CONTROL),
            KeyAction::Quit
        );
        // Plain 'c' is not a quit key
        assert_eq!(
            classify_key(KeyCode::Char('c'), KeyModifiers::NONE),
            KeyAction::Ignore
        );
    }

    #[test]
    fn default_options_match_the_classic_endpoint() {
        let options = EndpointOptions::default();
        assert_eq!(options.sample_rate, 8000);
        assert!(options.show_window);
        assert!(options.device.is_none());
    }

    #[test]
    fn stop_flag_is_idempotent_from_outside_the_loop() {
        let flag = ShutdownFlag::new();
        flag.trigger();
        flag.trigger();
        assert!(flag.is_triggered());
    }

    #[test]
    fn surface_release_happens_exactly_once() {
        let mut surface = Surface {
            terminal: None,
            released: false,
        };
        assert!(surface.release());
        assert!(!surface.release());
        assert!(!surface.release());
    }

    /// Feeds a fixed event script to the loop, then reports an empty queue.
    struct ScriptedEvents {
        queue: VecDeque<Event>,
    }

    impl EventSource for ScriptedEvents {
        fn poll(&mut self, _timeout: Duration) -> io::Result<bool> {
            Ok(!self.queue.is_empty())
        }

        fn read(&mut self) -> io::Result<Event> {
            Ok(self.queue.pop_front().expect("read after poll"))
        }
    }

    #[tokio::test]
    async fn run_dispatches_events_and_exits_after_stop() {
        use crossterm::event::{KeyEvent, MouseEvent};

        let (key_tx, key_rx) = crossbeam_channel::unbounded::<DtmfKey>();
        let sink: DtmfSink = Box::new(move |key| {
            key_tx.send(key)?;
            Ok(())
        });

        let (playback_thread, playback) =
            PlaybackThread::spawn(None).expect("playback thread spawns without a device name");

        // One keyboard press and one left click on the same button (the
        // center of '5' in a 36x24 layout).
        let mut queue = VecDeque::new();
        queue.push_back(Event::Key(KeyEvent::new(
            KeyCode::Char('5'),
            KeyModifiers::NONE,
        )));
        queue.push_back(Event::Mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 18,
            row: 10,
            modifiers: KeyModifiers::NONE,
        }));

        let stop = ShutdownFlag::new();
        let io_loop = IoLoop {
            title: "test".to_string(),
            surface: Surface {
                terminal: None,
                released: false,
            },
            events: ScriptedEvents { queue },
            buttons: keypad::compute_layout(Rect::new(0, 0, 36, 24)),
            sink,
            stop: stop.clone(),
            playback: playback.clone(),
            playback_thread: Some(playback_thread),
            hover: None,
            recent: VecDeque::new(),
        };
        let task = tokio::spawn(io_loop.run());

        // Let at least one full iteration drain the script, then request
        // termination twice; the second trigger must be harmless.
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.trigger();
        stop.trigger();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop observes the stop flag and returns")
            .expect("loop task does not panic");

        let received: Vec<char> = key_rx.try_iter().map(DtmfKey::as_char).collect();
        assert_eq!(received, vec!['5', '5']);
        // The loop tore the playback thread down on the way out, so the
        // device is closed.
        assert!(playback.snapshot().rate.is_none());
    }
}
