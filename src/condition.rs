//! Cooperative predicate-wait primitive and its duration-string parser.

use std::sync::Arc;
use std::time::Duration;

use snafu::prelude::*;
use tokio::sync::oneshot;

use crate::context::Context;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid duration '{input}'"))]
    InvalidDuration { input: String },
    #[snafu(display("unknown duration unit '{unit}' in '{input}'"))]
    UnknownUnit { unit: String, input: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parse a duration given as a bare number of milliseconds or a
/// whitespace-separated sequence of `<number><unit>` tokens (optionally
/// compound, e.g. `"1h 30m"`), case-insensitive, fractional amounts
/// allowed (`"1.5s"`).
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return InvalidDurationSnafu { input }.fail();
    }

    if let Ok(ms) = trimmed.parse::<f64>() {
        return Ok(Duration::from_secs_f64((ms / 1000.0).max(0.0)));
    }

    let mut total = Duration::ZERO;
    for token in trimmed.split_whitespace() {
        total += parse_token(token, input)?;
    }
    Ok(total)
}

fn parse_token(token: &str, original: &str) -> Result<Duration> {
    let split_at = token
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .context(InvalidDurationSnafu { input: original })?;
    let (number, unit) = token.split_at(split_at);
    let amount: f64 = number
        .parse()
        .ok()
        .context(InvalidDurationSnafu { input: original })?;

    let seconds = match unit.to_ascii_lowercase().as_str() {
        "ms" => amount / 1000.0,
        "s" | "sec" | "second" | "seconds" => amount,
        "m" | "min" | "minute" | "minutes" => amount * 60.0,
        "h" | "hr" | "hour" | "hours" => amount * 3600.0,
        "d" | "day" | "days" => amount * 86400.0,
        "w" | "week" | "weeks" => amount * 604_800.0,
        other => {
            return UnknownUnitSnafu {
                unit: other.to_string(),
                input: original,
            }
            .fail();
        }
    };
    Ok(Duration::from_secs_f64(seconds.max(0.0)))
}

/// A registered, unresolved wait on `predicate`. Removed from its list as
/// soon as it resolves, whichever way.
struct Waiter {
    id: u64,
    predicate: Arc<dyn Fn(&Context) -> bool + Send + Sync>,
    resolve: Option<oneshot::Sender<bool>>,
}

/// The ordered collection of a workflow's currently-pending condition
/// waiters, re-evaluated after every signal delivery (see
/// [`crate::signal::HandlerRegistry`]).
#[derive(Default)]
pub struct ConditionList {
    waiters: Vec<Waiter>,
    next_id: u64,
}

impl ConditionList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `predicate` immediately; if already true, returns `Ok(true)`
    /// with no waiter registered. Otherwise registers a waiter and returns
    /// its id plus the receiver half the caller should race against an
    /// optional timeout.
    pub fn register(
        &mut self,
        predicate: Arc<dyn Fn(&Context) -> bool + Send + Sync>,
        ctx: &Context,
    ) -> std::result::Result<bool, (u64, oneshot::Receiver<bool>)> {
        if predicate(ctx) {
            return Ok(true);
        }
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.push(Waiter {
            id,
            predicate,
            resolve: Some(tx),
        });
        Err((id, rx))
    }

    /// A timeout firing before resolution: drop the waiter with `id` (if
    /// still present) and resolve it with `false`. A no-op if it already
    /// resolved via [`ConditionList::evaluate`].
    pub fn expire(&mut self, id: u64) {
        if let Some(pos) = self.waiters.iter().position(|w| w.id == id) {
            let mut waiter = self.waiters.remove(pos);
            if let Some(tx) = waiter.resolve.take() {
                let _ = tx.send(false);
            }
        }
    }

    /// Re-evaluate every pending waiter against `ctx`; resolve and drop any
    /// whose predicate now holds. A predicate that panics is not caught
    /// here — `predicate` closures are expected to be infallible, mirroring
    /// plain boolean expressions over the context.
    pub fn evaluate(&mut self, ctx: &Context) {
        self.waiters.retain_mut(|waiter| {
            if (waiter.predicate)(ctx) {
                if let Some(tx) = waiter.resolve.take() {
                    let _ = tx.send(true);
                }
                false
            } else {
                true
            }
        });
    }

    /// Resolve every pending waiter with `false`, drop its timer (by
    /// dropping the receiver's corresponding `select!` arm when the sender
    /// is dropped/sent) and empty the list. Called when the owning run
    /// settles.
    pub fn cancel_all(&mut self) {
        for mut waiter in self.waiters.drain(..) {
            if let Some(tx) = waiter.resolve.take() {
                let _ = tx.send(false);
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }
}
