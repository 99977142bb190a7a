//! Terminal rendering of the page: progress line, pending badge, toasts.

use std::io::{self, Write};

use waypoint_engine::Notifier;
use waypoint_types::{GameState, NotifyLevel};

#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNotifier {
    quiet: bool,
}

impl TerminalNotifier {
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

fn marker(level: NotifyLevel) -> &'static str {
    match level {
        NotifyLevel::Info => "i",
        NotifyLevel::Success => "✓",
        NotifyLevel::Warning => "!",
        NotifyLevel::Error => "✗",
    }
}

/// One line summarizing a replica, e.g. `game 7 / team 3: 2/5 found [✓✓*··]`.
#[must_use]
pub fn progress_line(state: &GameState) -> String {
    let found = state.locations.iter().filter(|loc| loc.found).count();
    let track: String = state
        .locations
        .iter()
        .map(|loc| match (loc.found, loc.local_only) {
            (true, false) => '✓',
            (true, true) => '*',
            (false, _) => '·',
        })
        .collect();
    format!(
        "game {} / team {}: {found}/{} found, next #{} [{track}]",
        state.game_id,
        state.team_id,
        state.locations.len(),
        state.current_index() + 1,
    )
}

impl Notifier for TerminalNotifier {
    fn render_from_state(&self, state: &GameState) {
        if !self.quiet {
            println!("{}", progress_line(state));
        }
    }

    fn update_pending_indicator(&self, count: usize) {
        if !self.quiet && count > 0 {
            println!("  {count} update(s) waiting to sync");
        }
    }

    fn notify(&self, message: &str, level: NotifyLevel) {
        let line = format!("[{}] {message}", marker(level));
        if matches!(level, NotifyLevel::Error | NotifyLevel::Warning) {
            let _ = writeln!(io::stderr(), "{line}");
        } else if !self.quiet {
            println!("{line}");
        }
    }
}
