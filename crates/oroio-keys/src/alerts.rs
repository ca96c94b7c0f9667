//! Alert engine
//!
//! Compares the merged key view against balance and expiry thresholds and
//! raises desktop alerts. Each condition alerts once and stays quiet while
//! it holds:
//!
//! - low balance, per key: re-arms when the key recovers (or disappears)
//! - expiring soon, per key: fires at most once per process
//! - all keys exhausted, global: re-arms as soon as any key has balance
//!
//! The suppression state sits behind a mutex because the periodic timer and
//! user-triggered checks share one engine.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, warn};

use oroio_core::format::percent;
use oroio_core::Config;
use oroio_notify::{Notification, Notifier, Urgency};

use crate::cache::KeyInfo;
use crate::codec::{Usage, UNKNOWN_EXPIRY};

/// Seconds a non-critical alert stays on screen
const ALERT_TIMEOUT_SECS: u32 = 10;

/// Alert thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Remaining fraction at or below which a key is low
    pub low_balance: f64,
    /// Warn when expiry is at most this far away
    pub expiry_window: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low_balance: 0.2,
            expiry_window: Duration::days(1),
        }
    }
}

impl Thresholds {
    pub fn from_config(config: &Config) -> Self {
        Self {
            low_balance: config.low_balance_threshold,
            expiry_window: Duration::try_days(config.expiry_warning_days)
                .filter(|window| *window >= Duration::zero())
                .unwrap_or_else(|| Self::default().expiry_window),
        }
    }
}

/// True if some balance is left but no more than `threshold` of the total
pub fn is_low_balance(usage: &Usage, threshold: f64) -> bool {
    match usage.remaining_ratio() {
        Some(ratio) => ratio > 0.0 && ratio <= threshold,
        None => false,
    }
}

/// True if the balance is known and used up
pub fn is_exhausted(usage: &Usage) -> bool {
    usage.balance.is_some_and(|balance| balance <= 0.0)
}

/// Parse an expiry value.
///
/// Accepts RFC 3339 timestamps (`2026-10-15T12:00:00Z`) and plain dates
/// (`2026-10-15`, read as midnight UTC). Anything else is unknown.
pub fn parse_expiry(expires: &str) -> Option<DateTime<Utc>> {
    let expires = expires.trim();
    if expires.is_empty() || expires == UNKNOWN_EXPIRY {
        return None;
    }

    if let Ok(at) = DateTime::parse_from_rfc3339(expires) {
        return Some(at.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(expires, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
}

/// True if the key expires after `now` but within `window`
pub fn is_expiring_soon(usage: &Usage, now: DateTime<Utc>, window: Duration) -> bool {
    match parse_expiry(&usage.expires) {
        Some(at) => {
            let remaining = at - now;
            remaining > Duration::zero() && remaining <= window
        }
        None => false,
    }
}

/// True if there is at least one key and every key is known to be exhausted.
/// A key without usage data is never exhausted.
pub fn all_exhausted(keys: &[KeyInfo]) -> bool {
    !keys.is_empty() && keys.iter().all(|k| k.usage.as_ref().is_some_and(is_exhausted))
}

/// An alert raised by a check
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    LowBalance { index: usize, percent: u32 },
    ExpiringSoon { index: usize, expires: String },
    AllExhausted,
}

impl Alert {
    pub fn to_notification(&self) -> Notification {
        match self {
            Alert::LowBalance { index, percent } => Notification::new(format!(
                "Key #{} has only {}% remaining",
                index, percent
            ))
            .with_title("Key Balance Low")
            .with_timeout(ALERT_TIMEOUT_SECS),
            Alert::ExpiringSoon { index, expires } => {
                Notification::new(format!("Key #{} expires on {}", index, expires))
                    .with_title("Key Expiring Soon")
                    .with_timeout(ALERT_TIMEOUT_SECS)
            }
            Alert::AllExhausted => Notification::new(
                "All your API keys have been used up. Add new keys to continue.",
            )
            .with_title("All Keys Exhausted!")
            .with_urgency(Urgency::Critical),
        }
    }
}

/// Which conditions have already been alerted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertState {
    low_balance: HashSet<usize>,
    expiry: HashSet<usize>,
    all_exhausted: bool,
}

impl AlertState {
    /// Follow the vault when a key is removed and later keys move down
    fn shift_after_remove(&mut self, removed: usize) {
        let shift = |set: &HashSet<usize>| -> HashSet<usize> {
            set.iter()
                .filter(|index| **index != removed)
                .map(|index| if *index > removed { index - 1 } else { *index })
                .collect()
        };
        self.low_balance = shift(&self.low_balance);
        self.expiry = shift(&self.expiry);
    }

    fn evaluate(
        &mut self,
        keys: &[KeyInfo],
        now: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let low: HashSet<usize> = keys
            .iter()
            .filter(|k| {
                k.usage
                    .as_ref()
                    .is_some_and(|u| is_low_balance(u, thresholds.low_balance))
            })
            .map(|k| k.index)
            .collect();

        for key in keys {
            if !low.contains(&key.index) || !self.low_balance.insert(key.index) {
                continue;
            }
            let ratio = key
                .usage
                .as_ref()
                .and_then(Usage::remaining_ratio)
                .unwrap_or(0.0);
            alerts.push(Alert::LowBalance {
                index: key.index,
                percent: percent(ratio),
            });
        }
        // Recovered or removed keys can alert again later
        self.low_balance.retain(|index| low.contains(index));

        for key in keys {
            let Some(usage) = &key.usage else {
                continue;
            };
            if is_expiring_soon(usage, now, thresholds.expiry_window)
                && self.expiry.insert(key.index)
            {
                alerts.push(Alert::ExpiringSoon {
                    index: key.index,
                    expires: usage.expires.clone(),
                });
            }
        }

        let exhausted = all_exhausted(keys);
        if exhausted && !self.all_exhausted {
            alerts.push(Alert::AllExhausted);
        }
        self.all_exhausted = exhausted;

        alerts
    }
}

/// Stateful alert engine shared by every check path
pub struct AlertEngine {
    state: Mutex<AlertState>,
    notifier: Box<dyn Notifier>,
    thresholds: Thresholds,
}

impl AlertEngine {
    pub fn new(notifier: Box<dyn Notifier>, thresholds: Thresholds) -> Self {
        Self {
            state: Mutex::new(AlertState::default()),
            notifier,
            thresholds,
        }
    }

    /// Check keys against the current time and deliver new alerts
    pub fn check(&self, keys: &[KeyInfo]) -> Vec<Alert> {
        self.check_at(keys, Utc::now())
    }

    /// Check keys as of `now` and deliver new alerts
    pub fn check_at(&self, keys: &[KeyInfo], now: DateTime<Utc>) -> Vec<Alert> {
        let alerts = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.evaluate(keys, now, &self.thresholds)
        };

        debug!(keys = keys.len(), alerts = alerts.len(), "alert check");
        for alert in &alerts {
            self.deliver(alert);
        }

        alerts
    }

    /// Re-index suppression state after key `removed` left the vault
    pub fn forget_key(&self, removed: usize) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .shift_after_remove(removed);
    }

    /// Forget every alert sent so far
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = AlertState::default();
    }

    /// Copy of the current suppression state
    pub fn state(&self) -> AlertState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn deliver(&self, alert: &Alert) {
        let notification = alert.to_notification();
        if let Err(e) = self.notifier.notify(&notification) {
            warn!("Failed to show alert '{}': {}", notification.title, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Notification>>>);

    impl Recorder {
        fn titles(&self) -> Vec<String> {
            self.0.lock().unwrap().iter().map(|n| n.title.clone()).collect()
        }
    }

    impl Notifier for Recorder {
        fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Broken;

    impl Notifier for Broken {
        fn notify(&self, _notification: &Notification) -> anyhow::Result<()> {
            bail!("no display")
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
    }

    fn key(index: usize, usage: Option<Usage>) -> KeyInfo {
        KeyInfo {
            key: format!("sk-{}", index),
            index,
            is_current: index == 1,
            usage,
        }
    }

    fn balance(balance: f64, total: f64) -> Option<Usage> {
        Some(Usage {
            balance: Some(balance),
            total: Some(total),
            ..Default::default()
        })
    }

    fn expiring(expires: &str) -> Option<Usage> {
        Some(Usage {
            expires: expires.to_string(),
            ..Default::default()
        })
    }

    fn engine() -> (AlertEngine, Recorder) {
        let recorder = Recorder::default();
        let engine = AlertEngine::new(Box::new(recorder.clone()), Thresholds::default());
        (engine, recorder)
    }

    #[test]
    fn test_low_balance_predicate() {
        let low = |b, t| is_low_balance(&balance(b, t).unwrap(), 0.2);

        assert!(low(20.0, 100.0));
        assert!(low(0.5, 100.0));
        assert!(!low(21.0, 100.0));
        assert!(!low(100.0, 100.0));
        assert!(!low(0.0, 100.0));
        assert!(!low(5.0, 0.0));
        assert!(!is_low_balance(&Usage::default(), 0.2));
    }

    #[test]
    fn test_exhausted_predicate() {
        assert!(is_exhausted(&balance(0.0, 100.0).unwrap()));
        assert!(is_exhausted(&balance(-3.0, 100.0).unwrap()));
        assert!(!is_exhausted(&balance(1.0, 100.0).unwrap()));
        assert!(!is_exhausted(&Usage::default()));
    }

    #[test]
    fn test_parse_expiry_formats() {
        assert_eq!(
            parse_expiry("2026-10-15"),
            Some(Utc.with_ymd_and_hms(2026, 10, 15, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_expiry("2026-10-15T08:30:00+02:00"),
            Some(Utc.with_ymd_and_hms(2026, 10, 15, 6, 30, 0).unwrap())
        );
        assert_eq!(parse_expiry("?"), None);
        assert_eq!(parse_expiry(""), None);
        assert_eq!(parse_expiry("Oct 15, 2026"), None);
        assert_eq!(parse_expiry("2026-02-30"), None);
    }

    #[test]
    fn test_expiring_soon_window() {
        let window = Duration::days(1);
        let soon = |s: &str| is_expiring_soon(&expiring(s).unwrap(), now(), window);

        assert!(soon("2026-10-15"));
        assert!(soon("2026-10-15T12:00:00Z"));
        assert!(!soon("2026-10-15T12:00:01Z"));
        assert!(!soon("2026-10-14T12:00:00Z"));
        assert!(!soon("2026-10-14"));
        assert!(!soon("2026-12-01"));
        assert!(!soon("?"));
    }

    #[test]
    fn test_all_exhausted_requires_usage_for_every_key() {
        let keys = vec![
            key(1, balance(0.0, 10.0)),
            key(2, balance(0.0, 10.0)),
            key(3, None),
        ];
        assert!(!all_exhausted(&keys));
        assert!(all_exhausted(&keys[..2]));
        assert!(!all_exhausted(&[]));
    }

    #[test]
    fn test_low_balance_alerts_once_until_recovered() {
        let (engine, recorder) = engine();
        let low = vec![key(1, balance(10.0, 100.0))];
        let recovered = vec![key(1, balance(80.0, 100.0))];

        assert_eq!(
            engine.check_at(&low, now()),
            vec![Alert::LowBalance { index: 1, percent: 10 }]
        );
        assert!(engine.check_at(&low, now()).is_empty());

        assert!(engine.check_at(&recovered, now()).is_empty());
        assert_eq!(engine.check_at(&low, now()).len(), 1);

        assert_eq!(recorder.titles(), vec!["Key Balance Low", "Key Balance Low"]);
    }

    #[test]
    fn test_low_balance_rearms_when_key_disappears() {
        let (engine, _recorder) = engine();
        let low = vec![key(1, balance(10.0, 100.0))];

        engine.check_at(&low, now());
        engine.check_at(&[], now());
        assert_eq!(engine.state(), AlertState::default());
        assert_eq!(engine.check_at(&low, now()).len(), 1);
    }

    #[test]
    fn test_forget_key_moves_suppression_down() {
        let (engine, recorder) = engine();
        let before = vec![
            key(1, balance(90.0, 100.0)),
            key(2, balance(80.0, 100.0)),
            key(3, balance(5.0, 100.0)),
        ];
        assert_eq!(engine.check_at(&before, now()).len(), 1);

        // Key 1 removed, the low key is now #2 and must stay quiet
        engine.forget_key(1);
        let after = vec![key(1, balance(80.0, 100.0)), key(2, balance(5.0, 100.0))];
        assert!(engine.check_at(&after, now()).is_empty());
        assert_eq!(recorder.titles().len(), 1);

        // Removing the low key itself re-arms nothing stale
        engine.forget_key(2);
        assert_eq!(engine.state(), AlertState::default());
    }

    #[test]
    fn test_expiry_alerts_once_per_process() {
        let (engine, recorder) = engine();
        let soon = vec![key(2, expiring("2026-10-15"))];
        let later = vec![key(2, expiring("2026-12-01"))];

        assert_eq!(
            engine.check_at(&soon, now()),
            vec![Alert::ExpiringSoon {
                index: 2,
                expires: "2026-10-15".to_string()
            }]
        );
        assert!(engine.check_at(&soon, now()).is_empty());
        assert!(engine.check_at(&later, now()).is_empty());
        assert!(engine.check_at(&soon, now()).is_empty());

        assert_eq!(recorder.titles(), vec!["Key Expiring Soon"]);
    }

    #[test]
    fn test_all_exhausted_alert_is_critical_and_rearms() {
        let (engine, recorder) = engine();
        let exhausted = vec![key(1, balance(0.0, 10.0)), key(2, balance(0.0, 5.0))];
        let one_left = vec![key(1, balance(0.0, 10.0)), key(2, balance(4.0, 5.0))];

        assert_eq!(engine.check_at(&exhausted, now()), vec![Alert::AllExhausted]);
        assert!(engine.check_at(&exhausted, now()).is_empty());
        assert!(engine.check_at(&one_left, now()).is_empty());
        assert_eq!(engine.check_at(&exhausted, now()), vec![Alert::AllExhausted]);

        let sent = recorder.0.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].urgency, Urgency::Critical);
        assert!(sent[0].sound);
    }

    #[test]
    fn test_keys_without_usage_never_alert() {
        let (engine, recorder) = engine();
        let keys = vec![key(1, None), key(2, None)];

        assert!(engine.check_at(&keys, now()).is_empty());
        assert!(recorder.titles().is_empty());
    }

    #[test]
    fn test_one_check_can_raise_several_alerts() {
        let (engine, _recorder) = engine();
        let keys = vec![
            key(1, balance(5.0, 100.0)),
            key(2, balance(15.0, 100.0)),
            key(3, expiring("2026-10-15")),
        ];

        let alerts = engine.check_at(&keys, now());
        assert_eq!(
            alerts,
            vec![
                Alert::LowBalance { index: 1, percent: 5 },
                Alert::LowBalance { index: 2, percent: 15 },
                Alert::ExpiringSoon {
                    index: 3,
                    expires: "2026-10-15".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_delivery_failure_does_not_stop_check() {
        let engine = AlertEngine::new(Box::new(Broken), Thresholds::default());
        let keys = vec![key(1, balance(5.0, 100.0)), key(2, balance(5.0, 100.0))];

        assert_eq!(engine.check_at(&keys, now()).len(), 2);
        assert!(engine.check_at(&keys, now()).is_empty());
    }

    #[test]
    fn test_reset_rearms_everything() {
        let (engine, _recorder) = engine();
        let keys = vec![key(1, expiring("2026-10-15"))];

        assert_eq!(engine.check_at(&keys, now()).len(), 1);
        engine.reset();
        assert_eq!(engine.check_at(&keys, now()).len(), 1);
    }

    #[test]
    fn test_thresholds_from_config() {
        let config = Config {
            low_balance_threshold: 0.5,
            expiry_warning_days: 3,
            ..Default::default()
        };
        let thresholds = Thresholds::from_config(&config);
        assert_eq!(thresholds.low_balance, 0.5);
        assert_eq!(thresholds.expiry_window, Duration::days(3));
    }

    #[test]
    fn test_thresholds_from_config_out_of_range_days() {
        for days in [i64::MAX, -5] {
            let config = Config {
                expiry_warning_days: days,
                ..Default::default()
            };
            let thresholds = Thresholds::from_config(&config);
            assert_eq!(thresholds.expiry_window, Duration::days(1), "{}", days);
        }
    }

    #[test]
    fn test_concurrent_checks_alert_once() {
        let (engine, recorder) = engine();
        let engine = Arc::new(engine);
        let keys = Arc::new(vec![key(1, balance(5.0, 100.0))]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let keys = Arc::clone(&keys);
                std::thread::spawn(move || engine.check_at(&keys, now()).len())
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1);
        assert_eq!(recorder.titles().len(), 1);
    }
}
