// src/console.rs

use std::{
    collections::HashMap,
    fmt::Write as _,
    io::{self, Write},
    sync::Arc,
    time::SystemTime,
};

use chrono::Utc;
use parking_lot::Mutex;
use termion::{clear, color, cursor, style};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::DisplayConfig,
    models::{Snapshot, NEVER_CHECKED},
    types::Resource,
    utils::{
        format::{format_currency, format_percent, format_time},
        store::SyncView,
    },
};

const RULE: &str = "═══════════════════════════════════════════════════════════════════════════════";
const THIN_RULE: &str = "─────────────────────────────────────────────────────────────────────────────";

#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub status: String,
    pub connection_state: ConnectionState,
    pub additional_info: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionState {
    Connected,
    Connecting,
    Disconnected,
    Error,
}

/// Terminal view of the latest [`SyncView`]. Owns no data of its own beyond endpoint health.
pub struct ConsoleManager {
    display: DisplayConfig,
    backend: String,
    service_statuses: Mutex<HashMap<Resource, ServiceStatus>>,
    start_time: SystemTime,
}

impl ConsoleManager {
    pub fn new(display: DisplayConfig, backend: impl Into<String>) -> Self {
        Self {
            display,
            backend: backend.into(),
            service_statuses: Mutex::new(HashMap::new()),
            start_time: SystemTime::now(),
        }
    }

    pub fn update_service_status(
        &self,
        resource: Resource,
        connection_state: ConnectionState,
        status: &str,
        additional_info: Option<String>,
    ) {
        self.service_statuses.lock().insert(
            resource,
            ServiceStatus {
                status: status.to_string(),
                connection_state,
                additional_info,
            },
        );
    }

    pub fn service_status(&self, resource: Resource) -> Option<ServiceStatus> {
        self.service_statuses.lock().get(&resource).cloned()
    }

    /// Redraws on every change of the watched view until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut views: watch::Receiver<Arc<SyncView>>, shutdown: CancellationToken) {
        loop {
            let view = views.borrow_and_update().clone();
            self.refresh_display(&view);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = views.changed() => {
                    if changed.is_err() {
                        debug!("View channel closed, console exiting");
                        break;
                    }
                }
            }
        }
    }

    pub fn refresh_display(&self, view: &SyncView) {
        let mut stdout = io::stdout();
        let full_screen = self.display.full_screen && termion::is_tty(&stdout);

        let frame = if full_screen {
            format!("{}{}{}", clear::All, cursor::Goto(1, 1), self.render(view, true))
        } else {
            self.render(view, false)
        };

        if let Err(e) = stdout.write_all(frame.as_bytes()).and_then(|_| stdout.flush()) {
            warn!("Failed to write console frame: {}", e);
        }
    }

    /// Renders one frame. `styled` adds terminal colors.
    pub fn render(&self, view: &SyncView, styled: bool) -> String {
        let mut out = String::new();
        let paint = |text: &str, tone: Tone| -> String {
            if styled {
                format!("{}{}{}", tone.code(), text, style::Reset)
            } else {
                text.to_string()
            }
        };

        // Header with title and uptime
        let uptime = self.start_time.elapsed().unwrap_or_default().as_secs();
        let _ = writeln!(out, "{}", paint(RULE, Tone::Accent));
        let _ = writeln!(
            out,
            "  ARBITRAGE DASHBOARD  │  Backend: {}  │  Uptime: {}h {}m {}s  │  {}",
            self.backend,
            uptime / 3600,
            (uptime % 3600) / 60,
            uptime % 60,
            Utc::now().format("%H:%M:%S UTC")
        );
        let _ = writeln!(out, "{}", paint(RULE, Tone::Accent));

        // Error notice sits above the data, never in place of it
        if let Some(error) = &view.last_error {
            let held = match &view.snapshot {
                Some(snapshot) => format!(
                    "showing cycle {} from {}",
                    snapshot.cycle,
                    format_time(&snapshot.fetched_at)
                ),
                None => "no data to show".to_string(),
            };
            let _ = writeln!(out, "{}", paint(&format!("  ! Last update failed: {} ({})", error, held), Tone::Bad));
        }

        match &view.snapshot {
            Some(snapshot) => {
                self.render_status_bar(&mut out, snapshot, &paint);
                self.render_stats(&mut out, Some(snapshot));
                self.render_endpoints(&mut out, &paint);
                self.render_opportunities(&mut out, snapshot, &paint);
            }
            None if view.loading => {
                let _ = writeln!(out, "  Bot Status: {}  │  Last Check: {}", paint("Connecting", Tone::Muted), NEVER_CHECKED);
                self.render_stats(&mut out, None);
                self.render_endpoints(&mut out, &paint);
                let _ = writeln!(out, "\nRECENT ARBITRAGE OPPORTUNITIES");
                let _ = writeln!(out, "  Loading opportunities...");
            }
            None => {
                self.render_endpoints(&mut out, &paint);
            }
        }

        self.render_config_panel(&mut out);
        let _ = writeln!(out, "{}", paint(RULE, Tone::Accent));
        out
    }

    fn render_status_bar(&self, out: &mut String, snapshot: &Snapshot, paint: &dyn Fn(&str, Tone) -> String) {
        let running = if snapshot.status.running {
            paint("Running", Tone::Good)
        } else {
            paint("Stopped", Tone::Bad)
        };
        let _ = write!(out, "  Bot Status: {}  │  Last Check: {}", running, snapshot.status.last_check);
        if let Some(detail) = &snapshot.status.detail {
            let _ = write!(out, "  │  {}", detail);
        }
        let _ = writeln!(out);
    }

    fn render_stats(&self, out: &mut String, snapshot: Option<&Snapshot>) {
        let _ = writeln!(out, "\nSTATISTICS");
        let cards: [(&str, String); 4] = match snapshot {
            Some(snapshot) => [
                ("Total Opportunities", snapshot.stats.total_opportunities.to_string()),
                ("Average Profit", format!("${}", snapshot.stats.average_profit)),
                ("Best Opportunity", format!("${}", snapshot.stats.best_profit)),
                ("Runtime", snapshot.stats.runtime.clone()),
            ],
            None => [
                ("Total Opportunities", "Loading...".to_string()),
                ("Average Profit", "Loading...".to_string()),
                ("Best Opportunity", "Loading...".to_string()),
                ("Runtime", "Loading...".to_string()),
            ],
        };
        for (title, value) in cards.iter() {
            let _ = writeln!(out, "  {:<22}{}", title, value);
        }
    }

    fn render_endpoints(&self, out: &mut String, paint: &dyn Fn(&str, Tone) -> String) {
        let statuses = self.service_statuses.lock();
        if statuses.is_empty() {
            return;
        }

        let _ = writeln!(out, "\nBACKEND ENDPOINTS");
        for resource in Resource::ALL {
            if let Some(service_status) = statuses.get(&resource) {
                let indicator = paint("●", Tone::from(service_status.connection_state));
                let _ = write!(out, "  {} {:<14}│  {}", indicator, resource.path().to_uppercase(), service_status.status);
                if let Some(info) = &service_status.additional_info {
                    let _ = write!(out, "  │  {}", info);
                }
                let _ = writeln!(out);
            }
        }
    }

    fn render_opportunities(&self, out: &mut String, snapshot: &Snapshot, paint: &dyn Fn(&str, Tone) -> String) {
        if snapshot.is_empty() {
            let _ = writeln!(out, "\nRECENT ARBITRAGE OPPORTUNITIES");
            let _ = writeln!(out, "  No arbitrage opportunities detected yet.");
            let _ = writeln!(out, "  The bot is actively monitoring for profitable trades...");
            return;
        }

        let _ = writeln!(out, "\nRECENT ARBITRAGE OPPORTUNITIES ({})", snapshot.opportunities.len());
        let _ = writeln!(
            out,
            "  {:<10}│ {:<14}│ {:<14}│ {:>11} │ {:>11} │ {:>11} │ {:>8}",
            "TIMESTAMP", "BUY EXCHANGE", "SELL EXCHANGE", "BUY PRICE", "SELL PRICE", "EST. PROFIT", "PROFIT %"
        );
        let _ = writeln!(out, "  {}", paint(THIN_RULE, Tone::Muted));

        for opportunity in snapshot.opportunities.iter().take(self.display.max_rows) {
            let profit = format!("{:>11}", format_currency(opportunity.estimated_profit));
            let percent = format!("{:>8}", format_percent(opportunity.profit_percentage));
            let _ = writeln!(
                out,
                "  {:<10}│ {:<14}│ {:<14}│ {:>11} │ {:>11} │ {} │ {}",
                format_time(&opportunity.timestamp),
                opportunity.buy_exchange,
                opportunity.sell_exchange,
                format_currency(opportunity.buy_price),
                format_currency(opportunity.sell_price),
                paint(&profit, Tone::Good),
                paint(&percent, Tone::Good),
            );
        }

        let hidden = snapshot.opportunities.len().saturating_sub(self.display.max_rows);
        if hidden > 0 {
            let _ = writeln!(out, "  ... {} more", hidden);
        }
    }

    fn render_config_panel(&self, out: &mut String) {
        let _ = writeln!(out, "\nBOT CONFIGURATION");
        for (label, value) in self.display.bot_profile.entries() {
            let _ = writeln!(out, "  {:<22}{}", label, value);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Tone {
    Accent,
    Good,
    Bad,
    Muted,
    Warning,
}

impl Tone {
    fn code(self) -> String {
        match self {
            Tone::Accent => format!("{}{}", style::Bold, color::Fg(color::Cyan)),
            Tone::Good => color::Fg(color::Green).to_string(),
            Tone::Bad => color::Fg(color::Red).to_string(),
            Tone::Muted => color::Fg(color::LightBlack).to_string(),
            Tone::Warning => color::Fg(color::Yellow).to_string(),
        }
    }
}

impl From<ConnectionState> for Tone {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Tone::Good,
            ConnectionState::Connecting => Tone::Warning,
            ConnectionState::Disconnected | ConnectionState::Error => Tone::Bad,
        }
    }
}
