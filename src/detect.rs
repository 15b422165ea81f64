//! Pure notify/no-notify decisions.
//!
//! Every function takes the freshly observed value, the cached baseline and
//! whatever threshold inputs it needs, and returns the decision together with
//! the cache write the caller should perform. Nothing here touches I/O.

use crate::error::DetectError;

/// Notify when the remaining native balance is worth less than this.
pub const LOW_BALANCE_USD: f64 = 15.0;

/// Smallest price move, in percent, worth reporting.
pub const PRICE_MOVE_MIN_PCT: f64 = 0.001;

/// Minimum APR increase, in percent of the cached APR.
pub const APR_JUMP_PCT: f64 = 20.0;

pub const MINUTE: i64 = 60;
pub const DAY: i64 = 24 * 60 * MINUTE;

pub const PRICE_NOTIFY_COOLDOWN: i64 = 2 * DAY;
pub const NEW_ROUND_COOLDOWN: i64 = 30 * MINUTE;
pub const PREDICTION_COOLDOWN: i64 = 3 * DAY;
pub const UNCLAIMED_LOTTERY_COOLDOWN: i64 = 5 * DAY;

/// Players are reminded once fewer than this many seconds remain before a draw.
pub const DRAW_REMINDER_WINDOW: i64 = 120 * MINUTE;

/// What the caller should write back to the cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheUpdate<T> {
    Keep,
    Set(T),
    /// Write only once a dispatch reached at least one recipient.
    SetOnDispatch(T),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision<T> {
    pub notify: bool,
    pub update: CacheUpdate<T>,
}

impl<T> Decision<T> {
    fn quiet(update: CacheUpdate<T>) -> Self {
        Self {
            notify: false,
            update,
        }
    }
}

/// `(current - previous) / previous * 100`.
pub fn percentage_change(previous: f64, current: f64) -> Result<f64, DetectError> {
    if !previous.is_finite() {
        return Err(DetectError::NonFinite("previous value"));
    }
    if !current.is_finite() {
        return Err(DetectError::NonFinite("current value"));
    }
    if previous == 0.0 {
        return Err(DetectError::ZeroBaseline("percentage change"));
    }
    let pct = (current - previous) / previous * 100.0;
    if !pct.is_finite() {
        return Err(DetectError::NonFinite("percentage change"));
    }
    Ok(pct)
}

/// Low native balance.
///
/// Only a decrease can alert; a first observation or an increase just moves
/// the baseline. Every decrease moves the baseline too, so a balance that
/// stays low does not alert again until it drops further.
pub fn balance_drop(current: f64, cached: Option<f64>, usd_price: f64) -> Decision<f64> {
    match cached {
        Some(cached) if current == cached => Decision::quiet(CacheUpdate::Keep),
        Some(cached) if current < cached => Decision {
            notify: usd_price * current < LOW_BALANCE_USD,
            update: CacheUpdate::Set(current),
        },
        _ => Decision::quiet(CacheUpdate::Set(current)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceDecision {
    pub notify: bool,
    /// Signed change against the cached price; zero on first observation.
    pub change_pct: f64,
    /// Cached price is always replaced with the observed one.
    pub price: f64,
    /// Whether to stamp the "last notified" timestamp with `now`.
    pub stamp: bool,
}

/// Native token price movement.
pub fn price_movement(
    current: f64,
    cached: Option<f64>,
    last_notified: Option<i64>,
    now: i64,
) -> Result<PriceDecision, DetectError> {
    let (cached, last_notified) = match (cached, last_notified) {
        (Some(c), Some(t)) => (c, t),
        _ => {
            return Ok(PriceDecision {
                notify: false,
                change_pct: 0.0,
                price: current,
                stamp: true,
            });
        }
    };
    let change_pct = percentage_change(cached, current)?;
    let notify = change_pct > 0.0
        && change_pct.abs() >= PRICE_MOVE_MIN_PCT
        && now - last_notified >= PRICE_NOTIFY_COOLDOWN;
    Ok(PriceDecision {
        notify,
        change_pct,
        price: current,
        stamp: notify,
    })
}

/// Farm APR spike. The baseline only moves when an alert actually goes out,
/// so the comparison is always against the last announced APR.
pub fn apr_jump(current: f64, cached: Option<f64>) -> Result<Decision<f64>, DetectError> {
    let cached = match cached {
        // A zero APR was never announceable, treat it as unseeded.
        Some(c) if c != 0.0 => c,
        _ => return Ok(Decision::quiet(CacheUpdate::Set(current))),
    };
    if current == cached {
        return Ok(Decision::quiet(CacheUpdate::Keep));
    }
    let increase = percentage_change(cached, current)?;
    if increase >= APR_JUMP_PCT {
        Ok(Decision {
            notify: true,
            update: CacheUpdate::SetOnDispatch(current),
        })
    } else {
        Ok(Decision::quiet(CacheUpdate::Keep))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionDecision {
    /// Store the TTL flag for this (network, position, pool, owner).
    pub store_flag: bool,
    /// Add the owner to this tick's batch.
    pub notify_owner: bool,
}

/// Out-of-range liquidity position, deduplicated by a TTL flag.
pub fn position_out_of_range(flag_exists: bool, owner_subscribed: bool) -> PositionDecision {
    PositionDecision {
        store_flag: !flag_exists,
        notify_owner: !flag_exists && owner_subscribed,
    }
}

/// True if the subject was never notified or its cooldown has passed.
pub fn cooldown_elapsed(last_notified: Option<i64>, now: i64, window: i64) -> bool {
    match last_notified {
        None => true,
        Some(last) => (now - last).abs() > window,
    }
}

/// A finished round is announced exactly once.
pub fn announce_round(already_announced: bool, draw_time: i64, now: i64) -> bool {
    !already_announced && now >= draw_time
}

/// Remind entered players shortly before the draw, once per round.
pub fn draw_reminder_due(already_reminded: bool, draw_time: i64, now: i64) -> bool {
    let remaining = draw_time - now;
    !already_reminded && remaining > 0 && remaining < DRAW_REMINDER_WINDOW
}

/// Reward bracket of a lottery ticket, or `None` for a losing ticket.
///
/// Digits are matched from the right; the leftmost digit of both numbers is
/// a marker and never compared. Bracket `n` means `n + 1` matching digits.
pub fn reward_bracket(ticket: &str, final_number: &str) -> Option<usize> {
    let comparable = final_number.chars().count().saturating_sub(1);
    let matching = ticket
        .chars()
        .rev()
        .zip(final_number.chars().rev())
        .take(comparable)
        .take_while(|(t, f)| t == f)
        .count();
    matching.checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    const NOW: i64 = 1_700_000_000;

    // ── percentage_change ──────────────────────────────────────────

    #[test]
    fn pct_basic() {
        assert!(approx_eq(percentage_change(10.0, 12.0).unwrap(), 20.0));
        assert!(approx_eq(percentage_change(100.0, 99.0).unwrap(), -1.0));
    }

    #[test]
    fn pct_zero_baseline_fails_loudly() {
        assert_eq!(
            percentage_change(0.0, 5.0),
            Err(DetectError::ZeroBaseline("percentage change"))
        );
    }

    #[test]
    fn pct_rejects_non_finite() {
        assert!(percentage_change(f64::NAN, 1.0).is_err());
        assert!(percentage_change(1.0, f64::INFINITY).is_err());
        assert!(percentage_change(f64::MIN_POSITIVE, f64::MAX).is_err());
    }

    // ── balance_drop ───────────────────────────────────────────────

    #[test]
    fn balance_unchanged() {
        let d = balance_drop(10.0, Some(10.0), 2.0);
        assert!(!d.notify);
        assert_eq!(d.update, CacheUpdate::Keep);
    }

    #[test]
    fn balance_first_observation() {
        let d = balance_drop(5.0, None, 2.0);
        assert!(!d.notify);
        assert_eq!(d.update, CacheUpdate::Set(5.0));
    }

    #[test]
    fn balance_increase() {
        let d = balance_drop(8.0, Some(5.0), 0.1);
        assert!(!d.notify);
        assert_eq!(d.update, CacheUpdate::Set(8.0));
    }

    #[test]
    fn balance_drop_below_threshold() {
        let d = balance_drop(3.0, Some(8.0), 2.0);
        assert!(d.notify); // $6 < $15
        assert_eq!(d.update, CacheUpdate::Set(3.0));
    }

    #[test]
    fn balance_drop_above_threshold() {
        let d = balance_drop(3.0, Some(8.0), 10.0);
        assert!(!d.notify); // $30 >= $15
        assert_eq!(d.update, CacheUpdate::Set(3.0));
    }

    #[test]
    fn balance_drop_exactly_at_threshold() {
        let d = balance_drop(1.5, Some(8.0), 10.0);
        assert!(!d.notify); // $15 is not below $15
    }

    // ── price_movement ─────────────────────────────────────────────

    #[test]
    fn price_first_observation_seeds() {
        let d = price_movement(100.0, None, None, NOW).unwrap();
        assert!(!d.notify);
        assert!(d.stamp);
        assert!(approx_eq(d.price, 100.0));
    }

    #[test]
    fn price_missing_timestamp_seeds() {
        let d = price_movement(100.0, Some(90.0), None, NOW).unwrap();
        assert!(!d.notify);
        assert!(d.stamp);
    }

    #[test]
    fn price_small_rise_after_cooldown() {
        let d = price_movement(100.002, Some(100.0), Some(NOW - 3 * DAY), NOW).unwrap();
        assert!(d.notify);
        assert!(d.change_pct >= PRICE_MOVE_MIN_PCT);
        assert!(d.stamp);
    }

    #[test]
    fn price_rise_within_cooldown() {
        let d = price_movement(110.0, Some(100.0), Some(NOW - DAY), NOW).unwrap();
        assert!(!d.notify);
        assert!(!d.stamp);
        assert!(approx_eq(d.price, 110.0)); // baseline still refreshed
    }

    #[test]
    fn price_fall_never_notifies() {
        let d = price_movement(99.0, Some(100.0), Some(NOW - 30 * DAY), NOW).unwrap();
        assert!(!d.notify);
        assert!(approx_eq(d.change_pct, -1.0));
        assert!(approx_eq(d.price, 99.0));
    }

    #[test]
    fn price_below_minimum_move() {
        let d = price_movement(100.0005, Some(100.0), Some(NOW - 3 * DAY), NOW).unwrap();
        assert!(!d.notify);
    }

    #[test]
    fn price_zero_baseline_errors() {
        assert!(price_movement(1.0, Some(0.0), Some(NOW - 3 * DAY), NOW).is_err());
    }

    // ── apr_jump ───────────────────────────────────────────────────

    #[test]
    fn apr_twenty_percent_notifies() {
        let d = apr_jump(12.0, Some(10.0)).unwrap();
        assert!(d.notify);
        assert_eq!(d.update, CacheUpdate::SetOnDispatch(12.0));
    }

    #[test]
    fn apr_nineteen_percent_keeps_baseline() {
        let d = apr_jump(11.9, Some(10.0)).unwrap();
        assert!(!d.notify);
        assert_eq!(d.update, CacheUpdate::Keep);
    }

    #[test]
    fn apr_first_observation_seeds() {
        let d = apr_jump(7.5, None).unwrap();
        assert!(!d.notify);
        assert_eq!(d.update, CacheUpdate::Set(7.5));
    }

    #[test]
    fn apr_zero_cached_reseeds() {
        let d = apr_jump(7.5, Some(0.0)).unwrap();
        assert!(!d.notify);
        assert_eq!(d.update, CacheUpdate::Set(7.5));
    }

    #[test]
    fn apr_unchanged() {
        let d = apr_jump(10.0, Some(10.0)).unwrap();
        assert!(!d.notify);
        assert_eq!(d.update, CacheUpdate::Keep);
    }

    #[test]
    fn apr_drop_is_quiet() {
        let d = apr_jump(5.0, Some(10.0)).unwrap();
        assert!(!d.notify);
        assert_eq!(d.update, CacheUpdate::Keep);
    }

    #[test]
    fn apr_gradual_drift_never_crosses() {
        // Each step is < 20% against the unchanged baseline of 10.
        let mut cached = Some(10.0);
        for current in [10.5, 11.0, 11.5, 11.9] {
            let d = apr_jump(current, cached).unwrap();
            assert!(!d.notify);
            if let CacheUpdate::Set(v) | CacheUpdate::SetOnDispatch(v) = d.update {
                cached = Some(v);
            }
        }
        assert_eq!(cached, Some(10.0));
    }

    // ── position_out_of_range ──────────────────────────────────────

    #[test]
    fn position_first_sight_subscribed() {
        let d = position_out_of_range(false, true);
        assert!(d.store_flag);
        assert!(d.notify_owner);
    }

    #[test]
    fn position_first_sight_not_subscribed() {
        let d = position_out_of_range(false, false);
        assert!(d.store_flag);
        assert!(!d.notify_owner);
    }

    #[test]
    fn position_already_flagged() {
        let d = position_out_of_range(true, true);
        assert!(!d.store_flag);
        assert!(!d.notify_owner);
    }

    // ── cooldowns and rounds ───────────────────────────────────────

    #[test]
    fn cooldown_never_notified() {
        assert!(cooldown_elapsed(None, NOW, NEW_ROUND_COOLDOWN));
    }

    #[test]
    fn cooldown_windows() {
        assert!(!cooldown_elapsed(Some(NOW - 30 * MINUTE), NOW, NEW_ROUND_COOLDOWN));
        assert!(cooldown_elapsed(Some(NOW - 31 * MINUTE), NOW, NEW_ROUND_COOLDOWN));
        assert!(!cooldown_elapsed(Some(NOW - 3 * DAY), NOW, PREDICTION_COOLDOWN));
        assert!(cooldown_elapsed(Some(NOW - 3 * DAY - 1), NOW, PREDICTION_COOLDOWN));
        assert!(!cooldown_elapsed(Some(NOW - 4 * DAY), NOW, UNCLAIMED_LOTTERY_COOLDOWN));
        assert!(cooldown_elapsed(Some(NOW - 6 * DAY), NOW, UNCLAIMED_LOTTERY_COOLDOWN));
    }

    #[test]
    fn round_announced_once() {
        assert!(announce_round(false, NOW - 10, NOW));
        assert!(!announce_round(true, NOW - 10, NOW));
        assert!(!announce_round(false, NOW + 10, NOW));
    }

    #[test]
    fn draw_reminder_window() {
        assert!(draw_reminder_due(false, NOW + 119 * MINUTE, NOW));
        assert!(!draw_reminder_due(false, NOW + 120 * MINUTE, NOW));
        assert!(!draw_reminder_due(false, NOW - MINUTE, NOW));
        assert!(!draw_reminder_due(true, NOW + MINUTE, NOW));
    }

    // ── reward_bracket ─────────────────────────────────────────────

    #[test]
    fn bracket_no_match() {
        assert_eq!(reward_bracket("1234567", "1234560"), None);
    }

    #[test]
    fn bracket_partial_match() {
        assert_eq!(reward_bracket("1000067", "1999967"), Some(1));
    }

    #[test]
    fn bracket_full_match_ignores_marker() {
        assert_eq!(reward_bracket("1654321", "1654321"), Some(5));
        assert_eq!(reward_bracket("2654321", "1654321"), Some(5));
    }
}
