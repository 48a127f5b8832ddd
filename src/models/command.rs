//! # models::command
//!
//! The controller → daemon command vocabulary and its line-oriented wire form.
//!
//! ```text
//! ACTION=BUY
//! PAIR=BTCUSDT
//! SCORE=0.75
//! TIMESTAMP=2024-05-01T12:00:00Z
//! ```
//!
//! Keys are case-insensitive, blank lines and `#` comments are skipped. A bare
//! verb line (`START`, `BUY BTCUSDT 0.7`) is still understood because older
//! controllers wrote the command file that way.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::CommandError;

// ─── Action ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Buy,
    Sell,
    CloseAll,
    Sync,
    HealthCheck,
    Shutdown,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Start,
        Action::Stop,
        Action::Buy,
        Action::Sell,
        Action::CloseAll,
        Action::Sync,
        Action::HealthCheck,
        Action::Shutdown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start       => "START",
            Action::Stop        => "STOP",
            Action::Buy         => "BUY",
            Action::Sell        => "SELL",
            Action::CloseAll    => "CLOSE_ALL",
            Action::Sync        => "SYNC",
            Action::HealthCheck => "HEALTH_CHECK",
            Action::Shutdown    => "SHUTDOWN",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        Action::ALL.into_iter().find(|a| a.as_str() == upper)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Score Range ──────────────────────────────────────────────────────────────

/// Accepted domain of the confidence `SCORE` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreRange {
    /// [-1, 1]
    Signed,
    /// [0, 1]
    Unit,
}

impl ScoreRange {
    pub fn bounds(self) -> (f64, f64) {
        match self {
            ScoreRange::Signed => (-1.0, 1.0),
            ScoreRange::Unit   => (0.0, 1.0),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "signed" | "-1..1" => Some(ScoreRange::Signed),
            "unit" | "0..1"    => Some(ScoreRange::Unit),
            _ => None,
        }
    }
}

// ─── Command ──────────────────────────────────────────────────────────────────

/// Payload of BUY / SELL.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSignal {
    pub symbol: String,
    pub score:  f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Buy(TradeSignal),
    Sell(TradeSignal),
    CloseAll,
    Sync,
    HealthCheck,
    Shutdown,
}

impl Command {
    pub fn action(&self) -> Action {
        match self {
            Command::Start       => Action::Start,
            Command::Stop        => Action::Stop,
            Command::Buy(_)      => Action::Buy,
            Command::Sell(_)     => Action::Sell,
            Command::CloseAll    => Action::CloseAll,
            Command::Sync        => Action::Sync,
            Command::HealthCheck => Action::HealthCheck,
            Command::Shutdown    => Action::Shutdown,
        }
    }

    /// Short human label for `last_command` in the status file.
    pub fn describe(&self) -> String {
        match self {
            Command::Buy(s) | Command::Sell(s) => {
                format!("{} {} score={}", self.action(), s.symbol, s.score)
            }
            other => other.action().to_string(),
        }
    }

    /// Wire form, as a controller writes it.
    pub fn render(&self, issued_at: DateTime<Utc>) -> String {
        let mut out = format!("ACTION={}\n", self.action());
        if let Command::Buy(s) | Command::Sell(s) = self {
            out.push_str(&format!("PAIR={}\nSCORE={}\n", s.symbol, s.score));
        }
        out.push_str(&format!("TIMESTAMP={}\n", issued_at.to_rfc3339()));
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub command:   Command,
    /// Informational only.
    pub issued_at: Option<DateTime<Utc>>,
}

// ─── Parser ───────────────────────────────────────────────────────────────────

/// Parse one command file body.
///
/// `Ok(None)` means "nothing pending" (empty or comment-only body).
pub fn parse_command(
    text:  &str,
    range: ScoreRange,
) -> Result<Option<ParsedCommand>, CommandError> {
    let fields = collect_fields(text)?;
    if fields.is_empty() {
        return Ok(None);
    }

    for key in fields.keys() {
        if !matches!(key.as_str(), "ACTION" | "PAIR" | "SCORE" | "TIMESTAMP") {
            debug!(key = %key, "Ignoring unknown command field");
        }
    }

    let raw_action = fields
        .get("ACTION")
        .filter(|v| !v.is_empty())
        .ok_or(CommandError::MissingAction)?;
    let action = Action::parse(raw_action)
        .ok_or_else(|| CommandError::UnknownAction(raw_action.clone()))?;

    let command = match action {
        Action::Start       => Command::Start,
        Action::Stop        => Command::Stop,
        Action::CloseAll    => Command::CloseAll,
        Action::Sync        => Command::Sync,
        Action::HealthCheck => Command::HealthCheck,
        Action::Shutdown    => Command::Shutdown,
        Action::Buy         => Command::Buy(trade_signal(&fields, "BUY", range)?),
        Action::Sell        => Command::Sell(trade_signal(&fields, "SELL", range)?),
    };

    let issued_at = fields.get("TIMESTAMP").and_then(|raw| {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!(timestamp = %raw, error = %e, "Ignoring unparseable TIMESTAMP");
                None
            }
        }
    });

    Ok(Some(ParsedCommand { command, issued_at }))
}

fn collect_fields(text: &str) -> Result<HashMap<String, String>, CommandError> {
    let mut fields = HashMap::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            fields.insert(key.trim().to_ascii_uppercase(), value.trim().to_string());
            continue;
        }

        // Legacy bare verb: "START" / "BUY BTCUSDT 0.7"
        if fields.is_empty() {
            let mut words = line.split_whitespace();
            if let Some(verb) = words.next() {
                fields.insert("ACTION".to_string(), verb.to_string());
            }
            if let Some(pair) = words.next() {
                fields.insert("PAIR".to_string(), pair.to_string());
            }
            if let Some(score) = words.next() {
                fields.insert("SCORE".to_string(), score.to_string());
            }
            continue;
        }

        return Err(CommandError::MalformedLine(line.to_string()));
    }

    Ok(fields)
}

fn trade_signal(
    fields: &HashMap<String, String>,
    action: &'static str,
    range:  ScoreRange,
) -> Result<TradeSignal, CommandError> {
    let pair = fields
        .get("PAIR")
        .filter(|v| !v.is_empty())
        .ok_or(CommandError::MissingField { action, field: "PAIR" })?;

    let symbol = pair.to_ascii_uppercase();
    if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CommandError::InvalidPair(pair.clone()));
    }

    let raw_score = fields
        .get("SCORE")
        .filter(|v| !v.is_empty())
        .ok_or(CommandError::MissingField { action, field: "SCORE" })?;

    let score: f64 = raw_score
        .parse()
        .map_err(|_| CommandError::InvalidScore(raw_score.clone()))?;
    if !score.is_finite() {
        return Err(CommandError::InvalidScore(raw_score.clone()));
    }

    let (min, max) = range.bounds();
    if score < min || score > max {
        return Err(CommandError::ScoreOutOfRange { score, min, max });
    }

    Ok(TradeSignal { symbol, score })
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Option<ParsedCommand>, CommandError> {
        parse_command(text, ScoreRange::Signed)
    }

    #[test]
    fn test_empty_and_comment_only_is_no_command() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   \n\n").unwrap(), None);
        assert_eq!(parse("# nothing yet\n").unwrap(), None);
    }

    #[test]
    fn test_buy_with_all_fields() {
        let cmd = parse("ACTION=BUY\nPAIR=btcusdt\nSCORE=0.75\nTIMESTAMP=2024-05-01T12:00:00Z\n")
            .unwrap()
            .unwrap();
        assert_eq!(
            cmd.command,
            Command::Buy(TradeSignal { symbol: "BTCUSDT".into(), score: 0.75 })
        );
        assert!(cmd.issued_at.is_some());
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let cmd = parse("action = start\n").unwrap().unwrap();
        assert_eq!(cmd.command, Command::Start);
    }

    #[test]
    fn test_buy_without_pair_rejected() {
        let err = parse("ACTION=BUY\nSCORE=0.5\n").unwrap_err();
        assert_eq!(err, CommandError::MissingField { action: "BUY", field: "PAIR" });
    }

    #[test]
    fn test_sell_without_score_rejected() {
        let err = parse("ACTION=SELL\nPAIR=ETHUSDT\n").unwrap_err();
        assert_eq!(err, CommandError::MissingField { action: "SELL", field: "SCORE" });
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = parse("ACTION=PAUSE\n").unwrap_err();
        assert_eq!(err, CommandError::UnknownAction("PAUSE".into()));
    }

    #[test]
    fn test_missing_action_rejected() {
        let err = parse("PAIR=BTCUSDT\n").unwrap_err();
        assert_eq!(err, CommandError::MissingAction);
    }

    #[test]
    fn test_score_range_depends_on_configuration() {
        let text = "ACTION=SELL\nPAIR=ETHUSDT\nSCORE=-0.4\n";
        assert!(parse_command(text, ScoreRange::Signed).is_ok());
        assert!(matches!(
            parse_command(text, ScoreRange::Unit),
            Err(CommandError::ScoreOutOfRange { .. })
        ));
        assert!(matches!(
            parse("ACTION=BUY\nPAIR=X\nSCORE=abc\n"),
            Err(CommandError::InvalidScore(_))
        ));
        assert!(matches!(
            parse("ACTION=BUY\nPAIR=X\nSCORE=NaN\n"),
            Err(CommandError::InvalidScore(_))
        ));
    }

    #[test]
    fn test_invalid_pair_rejected() {
        assert!(matches!(
            parse("ACTION=BUY\nPAIR=BTC/USDT\nSCORE=0.1\n"),
            Err(CommandError::InvalidPair(_))
        ));
    }

    #[test]
    fn test_legacy_bare_verb() {
        assert_eq!(parse("start\n").unwrap().unwrap().command, Command::Start);
        assert_eq!(
            parse("BUY SOLUSDT 0.3").unwrap().unwrap().command,
            Command::Buy(TradeSignal { symbol: "SOLUSDT".into(), score: 0.3 })
        );
    }

    #[test]
    fn test_bad_timestamp_is_informational() {
        let cmd = parse("ACTION=SYNC\nTIMESTAMP=yesterday\n").unwrap().unwrap();
        assert_eq!(cmd.command, Command::Sync);
        assert_eq!(cmd.issued_at, None);
    }

    #[test]
    fn test_render_parses_back() {
        let original = Command::Sell(TradeSignal { symbol: "ETHUSDT".into(), score: -0.5 });
        let text = original.render(Utc::now());
        assert_eq!(parse(&text).unwrap().unwrap().command, original);
    }

    #[test]
    fn test_malformed_line_after_fields() {
        assert!(matches!(
            parse("ACTION=START\ngarbage\n"),
            Err(CommandError::MalformedLine(_))
        ));
    }
}
