//! Host selection: a pure state machine driven by key events, plus the
//! alternate-screen loop that feeds it.

use std::fmt;
use std::io::Stdout;

use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, enable_raw_mode};
use futures::StreamExt;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing::{debug, warn};

use super::render;
use crate::SearchState;
use crate::config::HostDescriptor;
use crate::error::Result;
use crate::utils::restore_tui;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SessionMode {
    Ssh,
    Sftp,
}

impl SessionMode {
    pub const ALL: [SessionMode; 2] = [SessionMode::Ssh, SessionMode::Sftp];
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Ssh => write!(f, "SSH"),
            SessionMode::Sftp => write!(f, "SFTP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickerOutcome {
    Quit,
    Selected {
        host: HostDescriptor,
        mode: SessionMode,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickerFlow {
    Continue,
    Done(PickerOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerView {
    List,
    /// SSH/SFTP choice for the selected leaf.
    Action { cursor: usize },
}

pub struct HostPicker {
    roots: Vec<HostDescriptor>,
    /// Child indices from the top level down to the current group.
    path: Vec<usize>,
    /// Index into the filtered list of the current level.
    selected: usize,
    search: SearchState,
    view: PickerView,
}

impl HostPicker {
    pub fn new(roots: Vec<HostDescriptor>) -> Self {
        Self {
            roots,
            path: Vec::new(),
            selected: 0,
            search: SearchState::default(),
            view: PickerView::List,
        }
    }

    pub fn view(&self) -> PickerView {
        self.view
    }

    pub fn search(&self) -> &SearchState {
        &self.search
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    fn level(&self) -> &[HostDescriptor] {
        let mut level = self.roots.as_slice();
        for &i in &self.path {
            match level.get(i) {
                Some(group) => level = &group.children,
                None => return &[],
            }
        }
        level
    }

    /// Indices into the current level that pass the search filter.
    fn visible_indices(&self) -> Vec<usize> {
        let query = self.search.query();
        self.level()
            .iter()
            .enumerate()
            .filter(|(_, h)| query.is_empty() || h.matches(query))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn visible(&self) -> Vec<&HostDescriptor> {
        let level = self.level();
        self.visible_indices()
            .into_iter()
            .map(|i| &level[i])
            .collect()
    }

    /// Names of the groups entered so far.
    pub fn breadcrumb(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(self.path.len());
        let mut level = self.roots.as_slice();
        for &i in &self.path {
            let Some(group) = level.get(i) else { break };
            names.push(group.name.as_str());
            level = &group.children;
        }
        names
    }

    pub fn selected_host(&self) -> Option<&HostDescriptor> {
        let index = *self.visible_indices().get(self.selected)?;
        self.level().get(index)
    }

    fn move_selection(&mut self, down: bool) {
        let len = self.visible_indices().len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        self.selected = if down {
            (self.selected + 1) % len
        } else if self.selected == 0 {
            len - 1
        } else {
            self.selected - 1
        };
    }

    /// Descend into the selected group or open the action view on a leaf.
    fn open_selected(&mut self) {
        let Some(&index) = self.visible_indices().get(self.selected) else {
            return;
        };
        if self.level()[index].is_group() {
            debug!("entering group {}", self.level()[index].name);
            self.path.push(index);
            self.selected = 0;
            self.search.deactivate();
        } else {
            self.view = PickerView::Action { cursor: 0 };
        }
    }

    fn go_up(&mut self) {
        if let Some(index) = self.path.pop() {
            self.selected = index;
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> PickerFlow {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return PickerFlow::Done(PickerOutcome::Quit);
        }

        if let PickerView::Action { cursor } = self.view {
            return self.handle_action_key(key, cursor);
        }

        if self.search.is_on() {
            match key.code {
                KeyCode::Esc => {
                    self.search.deactivate();
                    self.selected = 0;
                }
                KeyCode::Enter => {
                    self.selected = 0;
                    self.search.apply();
                    self.open_selected();
                }
                KeyCode::Backspace => {
                    self.search.pop();
                    self.selected = 0;
                }
                KeyCode::Up => self.move_selection(false),
                KeyCode::Down => self.move_selection(true),
                KeyCode::Char(c) => {
                    self.search.push(c);
                    self.selected = 0;
                }
                _ => {}
            }
            return PickerFlow::Continue;
        }

        match key.code {
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(false),
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(true),
            KeyCode::Enter => self.open_selected(),
            KeyCode::Char('/') => {
                self.search.activate();
                self.selected = 0;
            }
            KeyCode::Esc => {
                if self.search.is_off() {
                    self.go_up();
                } else {
                    self.search.deactivate();
                    self.selected = 0;
                }
            }
            KeyCode::Char('q') => return PickerFlow::Done(PickerOutcome::Quit),
            _ => {}
        }
        PickerFlow::Continue
    }

    fn handle_action_key(&mut self, key: KeyEvent, cursor: usize) -> PickerFlow {
        let count = SessionMode::ALL.len();
        match key.code {
            KeyCode::Char('k') | KeyCode::Up => {
                self.view = PickerView::Action {
                    cursor: (cursor + count - 1) % count,
                };
            }
            KeyCode::Char('j') | KeyCode::Down => {
                self.view = PickerView::Action {
                    cursor: (cursor + 1) % count,
                };
            }
            KeyCode::Esc => self.view = PickerView::List,
            KeyCode::Char('q') => return PickerFlow::Done(PickerOutcome::Quit),
            KeyCode::Enter => {
                if let Some(host) = self.selected_host() {
                    return PickerFlow::Done(PickerOutcome::Selected {
                        host: host.clone(),
                        mode: SessionMode::ALL[cursor],
                    });
                }
                self.view = PickerView::List;
            }
            _ => {}
        }
        PickerFlow::Continue
    }
}

/// Show the picker on the alternate screen until the user chooses or quits.
pub async fn run_picker(hosts: Vec<HostDescriptor>) -> Result<PickerOutcome> {
    let mut picker = HostPicker::new(hosts);

    enable_raw_mode().inspect_err(|e| tracing::error!("Error enabling raw mode: {}", e))?;
    let mut stdout = std::io::stdout();
    if let Err(e) = execute!(stdout, EnterAlternateScreen) {
        let _ = restore_tui();
        return Err(e.into());
    }

    let result = match Terminal::new(CrosstermBackend::new(stdout)) {
        Ok(mut terminal) => event_loop(&mut terminal, &mut picker).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = restore_tui() {
        warn!("failed to leave picker screen: {}", e);
    }
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    picker: &mut HostPicker,
) -> Result<PickerOutcome> {
    let mut events = EventStream::new();
    loop {
        terminal.draw(|frame| render::draw_picker(frame, picker))?;

        match events.next().await {
            None => return Ok(PickerOutcome::Quit),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                if let PickerFlow::Done(outcome) = picker.handle_key(key) {
                    return Ok(outcome);
                }
            }
            Some(Ok(_)) => {}
        }
    }
}
