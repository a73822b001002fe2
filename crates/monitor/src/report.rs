// crates/monitor/src/report.rs
//! Human-readable rendering of the live snapshot.

use fedwatch_types::{ConnectionStatus, LiveSnapshot};

pub fn status_label(status: ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Idle => "idle".into(),
        ConnectionStatus::Connecting => "connecting".into(),
        ConnectionStatus::Live => "live".into(),
        ConnectionStatus::Reconnecting { attempt, delay_ms } => {
            format!("reconnecting (attempt {attempt}, in {delay_ms} ms)")
        }
        ConnectionStatus::Unauthorized => "unauthorized".into(),
        ConnectionStatus::Closed => "offline".into(),
    }
}

/// One line per report tick.
pub fn summary_line(status: ConnectionStatus, snap: &LiveSnapshot) -> String {
    let mut line = format!(
        "[{}] predictions={} attack_rate={:.1}%",
        status_label(status),
        snap.predictions.len(),
        snap.attack_rate() * 100.0
    );

    if let Some(g) = &snap.global_progress {
        line.push_str(&format!(" round={}/{} ({:.0}%)", g.current_round, g.total_rounds, g.percent()));
    } else if let Some(r) = snap.latest_round() {
        line.push_str(&format!(" round={}", r.round_number));
    }
    if let Some(r) = snap.latest_round() {
        if let Some(acc) = r.accuracy {
            line.push_str(&format!(" acc={:.3}", acc));
        }
        if let Some(loss) = r.loss {
            line.push_str(&format!(" loss={:.4}", loss));
        }
    }
    if !snap.client_progress.is_empty() {
        let clients: Vec<String> = snap
            .client_progress
            .values()
            .map(|c| format!("{}:{}", c.client_id, c.status))
            .collect();
        line.push_str(&format!(" clients=[{}]", clients.join(", ")));
    }
    if let Some(t) = &snap.training {
        line.push_str(&format!(" training={}", t.status));
    }
    line
}
