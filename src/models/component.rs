//! Model components: the parametric building blocks of composite models.
//!
//! Components form a closed set ([`ComponentKind`]). Each one knows its
//! parameter count, its bounds, how to evaluate itself on a [`TimeGrid`] and
//! how to derive a scale-aware starting point from the observed data.
//!
//! Trend components read the grid's step offsets. Seasonal and event
//! components read the grid's timestamps, so they stay aligned with the
//! calendar when the series has gaps.

use crate::core::{EventCalendar, TimeGrid};
use crate::utils::stats::{mean, median, simple_regression};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;

/// Largest exponent handed to `exp`, keeping evaluation finite for every `t`.
const MAX_EXPONENT: f64 = 700.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;
/// Rate bound for logistic components, in units of 1 / step.
const MAX_LOGISTIC_RATE: f64 = 10.0;
/// Growth-rate bound for exponential components, in units of 1 / step.
const MAX_EXPONENTIAL_RATE: f64 = 1.0;

/// How a seasonal component combines with the rest of the model.
///
/// Additive components contribute offsets around 0; multiplicative ones
/// contribute factors around 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonMode {
    #[default]
    Additive,
    Multiplicative,
}

impl SeasonMode {
    fn baseline(self) -> f64 {
        match self {
            SeasonMode::Additive => 0.0,
            SeasonMode::Multiplicative => 1.0,
        }
    }
}

/// Closed interval for one parameter; infinite ends mean unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub const UNBOUNDED: Bounds = Bounds {
        lower: f64::NEG_INFINITY,
        upper: f64::INFINITY,
    };

    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lower <= x && x <= self.upper
    }

    pub fn clamp(&self, x: f64) -> f64 {
        x.max(self.lower).min(self.upper)
    }

    /// Both ends finite.
    pub fn is_finite(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite()
    }

    /// `x` sits on one of the ends.
    pub fn is_active(&self, x: f64) -> bool {
        x <= self.lower || x >= self.upper
    }
}

/// The closed set of component shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentKind {
    /// `a`
    Constant,
    /// `a + b·t`
    Linear,
    /// `a·exp(b·t)`
    Exponential,
    /// `floor + (ceiling - floor) / (1 + exp(-rate·(t - midpoint)))`
    Logistic,
    /// `a + b·ln(1 + max(t, 0))`
    Logarithmic,
    /// `h` from step offset `at` onwards, 0 before.
    Step { at: f64 },
    /// One effect per weekday relative to Monday.
    Weekday { mode: SeasonMode },
    /// One effect per calendar month relative to January.
    Month { mode: SeasonMode },
    /// Sine/cosine pairs with the given period in days.
    Fourier {
        period_days: f64,
        order: usize,
        mode: SeasonMode,
    },
    /// One coefficient per calendar event name, times the event indicator.
    Calendar {
        calendar: Arc<EventCalendar>,
        names: Vec<String>,
    },
}

/// A named, immutable model component.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelComponent {
    name: String,
    kind: ComponentKind,
}

impl ModelComponent {
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn constant() -> Self {
        Self::new("constant", ComponentKind::Constant)
    }

    pub fn linear() -> Self {
        Self::new("linear", ComponentKind::Linear)
    }

    pub fn exponential() -> Self {
        Self::new("exponential", ComponentKind::Exponential)
    }

    pub fn logistic() -> Self {
        Self::new("logistic", ComponentKind::Logistic)
    }

    pub fn logarithmic() -> Self {
        Self::new("log", ComponentKind::Logarithmic)
    }

    /// Level shift starting at step offset `at`.
    pub fn step(at: f64) -> Self {
        Self::new(format!("step@{}", at), ComponentKind::Step { at })
    }

    pub fn weekday(mode: SeasonMode) -> Self {
        Self::new("weekday", ComponentKind::Weekday { mode })
    }

    pub fn month(mode: SeasonMode) -> Self {
        Self::new("month", ComponentKind::Month { mode })
    }

    /// Fourier seasonality with a 7-day period and 3 harmonics.
    pub fn fourier_weekly(mode: SeasonMode) -> Self {
        Self::new(
            "fourier_weekly",
            ComponentKind::Fourier {
                period_days: 7.0,
                order: 3,
                mode,
            },
        )
    }

    /// Fourier seasonality with a 365.25-day period and 4 harmonics.
    pub fn fourier_yearly(mode: SeasonMode) -> Self {
        Self::new(
            "fourier_yearly",
            ComponentKind::Fourier {
                period_days: 365.25,
                order: 4,
                mode,
            },
        )
    }

    /// Event component over the given event names.
    pub fn calendar(calendar: Arc<EventCalendar>, names: Vec<String>) -> Self {
        Self::new("calendar", ComponentKind::Calendar { calendar, names })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    /// Number of free parameters.
    pub fn arity(&self) -> usize {
        match &self.kind {
            ComponentKind::Constant | ComponentKind::Step { .. } => 1,
            ComponentKind::Linear | ComponentKind::Exponential | ComponentKind::Logarithmic => 2,
            ComponentKind::Logistic => 4,
            ComponentKind::Weekday { .. } => 6,
            ComponentKind::Month { .. } => 11,
            ComponentKind::Fourier { order, .. } => 2 * order,
            ComponentKind::Calendar { names, .. } => names.len(),
        }
    }

    /// Trend shapes (as opposed to seasonal, step and event components).
    pub fn is_trend(&self) -> bool {
        matches!(
            self.kind,
            ComponentKind::Constant
                | ComponentKind::Linear
                | ComponentKind::Exponential
                | ComponentKind::Logistic
                | ComponentKind::Logarithmic
        )
    }

    /// Whether the least-squares surface commonly has several basins.
    pub fn is_multimodal(&self) -> bool {
        matches!(self.kind, ComponentKind::Logistic)
    }

    /// Per-parameter bounds, in parameter order.
    pub fn bounds(&self) -> Vec<Bounds> {
        match &self.kind {
            ComponentKind::Exponential => vec![
                Bounds::UNBOUNDED,
                Bounds::new(-MAX_EXPONENTIAL_RATE, MAX_EXPONENTIAL_RATE),
            ],
            ComponentKind::Logistic => vec![
                Bounds::UNBOUNDED,
                Bounds::UNBOUNDED,
                Bounds::UNBOUNDED,
                Bounds::new(-MAX_LOGISTIC_RATE, MAX_LOGISTIC_RATE),
            ],
            // Keep multiplicative factors non-negative.
            ComponentKind::Weekday {
                mode: SeasonMode::Multiplicative,
            }
            | ComponentKind::Month {
                mode: SeasonMode::Multiplicative,
            } => vec![Bounds::new(-1.0, f64::INFINITY); self.arity()],
            _ => vec![Bounds::UNBOUNDED; self.arity()],
        }
    }

    /// Evaluate on every grid point. `params` must hold exactly `arity()` values.
    pub fn evaluate(&self, grid: &TimeGrid, params: &[f64]) -> Vec<f64> {
        let steps = grid.steps();
        let timestamps = grid.timestamps();
        match &self.kind {
            ComponentKind::Constant => vec![params[0]; grid.len()],
            ComponentKind::Linear => steps.iter().map(|t| params[0] + params[1] * t).collect(),
            ComponentKind::Exponential => steps
                .iter()
                .map(|t| params[0] * clamped_exp(params[1] * t))
                .collect(),
            ComponentKind::Logistic => {
                let (floor, ceiling, midpoint, rate) = (params[0], params[1], params[2], params[3]);
                steps
                    .iter()
                    .map(|t| floor + (ceiling - floor) / (1.0 + clamped_exp(-rate * (t - midpoint))))
                    .collect()
            }
            ComponentKind::Logarithmic => steps
                .iter()
                .map(|t| params[0] + params[1] * t.max(0.0).ln_1p())
                .collect(),
            ComponentKind::Step { at } => steps
                .iter()
                .map(|t| if *t >= *at { params[0] } else { 0.0 })
                .collect(),
            ComponentKind::Weekday { mode } => timestamps
                .iter()
                .map(|ts| mode.baseline() + relative_effect(params, weekday_index(ts)))
                .collect(),
            ComponentKind::Month { mode } => timestamps
                .iter()
                .map(|ts| mode.baseline() + relative_effect(params, ts.month0() as usize))
                .collect(),
            ComponentKind::Fourier {
                period_days,
                order,
                mode,
            } => timestamps
                .iter()
                .map(|ts| {
                    let phase = 2.0 * PI * epoch_days(ts) / period_days;
                    let wave: f64 = (1..=*order)
                        .map(|k| {
                            let angle = k as f64 * phase;
                            params[2 * k - 2] * angle.sin() + params[2 * k - 1] * angle.cos()
                        })
                        .sum();
                    mode.baseline() + wave
                })
                .collect(),
            ComponentKind::Calendar { calendar, names } => timestamps
                .iter()
                .map(|ts| {
                    names
                        .iter()
                        .zip(params)
                        .map(|(name, coef)| coef * calendar.indicator(name, ts))
                        .sum()
                })
                .collect(),
        }
    }

    /// Starting parameters derived from the observed data.
    ///
    /// `leading` marks the first term of a composite. Trend terms that are not
    /// leading start neutral (0 under addition, 1 under multiplication) so the
    /// composite starts near the leading term's fit.
    pub fn initial_guess(&self, ctx: &GuessContext<'_>, leading: bool, multiplied: bool) -> Vec<f64> {
        if self.is_trend() && !leading {
            let unit = if multiplied { 1.0 } else { 0.0 };
            return match self.kind {
                ComponentKind::Logistic => vec![unit, unit, ctx.mid_step(), 1.0],
                ComponentKind::Constant => vec![unit],
                _ => vec![unit, 0.0],
            };
        }

        let guess = match &self.kind {
            ComponentKind::Constant => vec![ctx.mean],
            ComponentKind::Linear => vec![ctx.intercept, ctx.slope],
            ComponentKind::Exponential => exponential_guess(ctx),
            ComponentKind::Logistic => logistic_guess(ctx),
            ComponentKind::Logarithmic => {
                let x: Vec<f64> = ctx.steps.iter().map(|t| t.max(0.0).ln_1p()).collect();
                match simple_regression(&x, ctx.values) {
                    Some((a, b)) => vec![a, b],
                    None => vec![ctx.mean, 0.0],
                }
            }
            ComponentKind::Step { at } => vec![step_guess(ctx, *at)],
            ComponentKind::Weekday { mode } => {
                grouped_effects(ctx, *mode, 7, |ts| weekday_index(ts))
            }
            ComponentKind::Month { mode } => {
                grouped_effects(ctx, *mode, 12, |ts| ts.month0() as usize)
            }
            ComponentKind::Fourier {
                period_days,
                order,
                mode,
            } => fourier_guess(ctx, *period_days, *order, *mode),
            ComponentKind::Calendar { calendar, names } => names
                .iter()
                .map(|name| {
                    let mut num = 0.0;
                    let mut den = 0.0;
                    for (ts, e) in ctx.timestamps.iter().zip(&ctx.detrended) {
                        let w = calendar.indicator(name, ts);
                        num += w * e;
                        den += w * w;
                    }
                    if den > 0.0 {
                        num / den
                    } else {
                        0.0
                    }
                })
                .collect(),
        };

        guess
            .into_iter()
            .zip(self.bounds())
            .map(|(x, b)| if x.is_finite() { b.clamp(x) } else { b.clamp(0.0) })
            .collect()
    }
}

/// Observed data summarised for initial guesses.
///
/// Built once per fit from the observed (non-missing, positively weighted)
/// points only.
#[derive(Debug, Clone)]
pub struct GuessContext<'a> {
    steps: &'a [f64],
    values: &'a [f64],
    timestamps: &'a [DateTime<Utc>],
    mean: f64,
    intercept: f64,
    slope: f64,
    /// `values - (intercept + slope·t)`.
    detrended: Vec<f64>,
    /// `values / (intercept + slope·t)`, NaN where the line is near zero.
    ratios: Vec<f64>,
}

impl<'a> GuessContext<'a> {
    pub fn new(steps: &'a [f64], values: &'a [f64], timestamps: &'a [DateTime<Utc>]) -> Self {
        let mean = if values.is_empty() { 0.0 } else { mean(values) };
        let (intercept, slope) = simple_regression(steps, values).unwrap_or((mean, 0.0));
        let scale = values.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1e-12);
        let line = |t: f64| intercept + slope * t;
        let detrended = steps.iter().zip(values).map(|(t, v)| v - line(*t)).collect();
        let ratios = steps
            .iter()
            .zip(values)
            .map(|(t, v)| {
                let l = line(*t);
                if l.abs() > 1e-6 * scale {
                    v / l
                } else {
                    f64::NAN
                }
            })
            .collect();
        Self {
            steps,
            values,
            timestamps,
            mean,
            intercept,
            slope,
            detrended,
            ratios,
        }
    }

    fn mid_step(&self) -> f64 {
        match (self.steps.first(), self.steps.last()) {
            (Some(a), Some(b)) => 0.5 * (a + b),
            _ => 0.0,
        }
    }

    fn step_span(&self) -> f64 {
        match (self.steps.first(), self.steps.last()) {
            (Some(a), Some(b)) if b > a => b - a,
            _ => 1.0,
        }
    }
}

fn clamped_exp(x: f64) -> f64 {
    x.clamp(-MAX_EXPONENT, MAX_EXPONENT).exp()
}

/// Effect of `index` relative to index 0, which is the reference level.
fn relative_effect(params: &[f64], index: usize) -> f64 {
    if index == 0 {
        0.0
    } else {
        params[index - 1]
    }
}

fn weekday_index(ts: &DateTime<Utc>) -> usize {
    ts.weekday().num_days_from_monday() as usize
}

fn epoch_days(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / MILLIS_PER_DAY
}

fn exponential_guess(ctx: &GuessContext<'_>) -> Vec<f64> {
    let all_positive = ctx.values.iter().all(|v| *v > 0.0);
    let all_negative = ctx.values.iter().all(|v| *v < 0.0);
    if all_positive || all_negative {
        let sign = if all_positive { 1.0 } else { -1.0 };
        let logs: Vec<f64> = ctx.values.iter().map(|v| (sign * v).ln()).collect();
        if let Some((a, b)) = simple_regression(ctx.steps, &logs) {
            return vec![sign * a.exp(), b];
        }
    }
    vec![ctx.mean, 0.0]
}

fn logistic_guess(ctx: &GuessContext<'_>) -> Vec<f64> {
    let lo = ctx.values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = ctx.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = hi - lo;
    let direction = if ctx.slope < 0.0 { -1.0 } else { 1.0 };

    // Slope at the midpoint is rate·(ceiling - floor)/4.
    let mut rate = if range > 0.0 {
        4.0 * ctx.slope / range
    } else {
        0.0
    };
    if !rate.is_finite() || rate.abs() < 1e-9 {
        rate = direction * 4.0 / ctx.step_span();
    }

    // Start from the crossing of the halfway level, else the window middle.
    let half = 0.5 * (lo + hi);
    let midpoint = ctx
        .steps
        .iter()
        .zip(ctx.values)
        .find(|(_, v)| direction * (**v - half) >= 0.0)
        .map(|(t, _)| *t)
        .unwrap_or_else(|| ctx.mid_step());

    let pad = 0.05 * range;
    vec![lo - pad, hi + pad, midpoint, rate]
}

fn step_guess(ctx: &GuessContext<'_>, at: f64) -> f64 {
    let split = ctx.steps.partition_point(|t| *t < at);
    if split == 0 || split == ctx.steps.len() {
        return 0.0;
    }
    let before = &ctx.values[split.saturating_sub(5)..split];
    let after = &ctx.values[split..(split + 5).min(ctx.values.len())];
    median(after) - median(before)
}

fn grouped_effects<K>(ctx: &GuessContext<'_>, mode: SeasonMode, groups: usize, key: K) -> Vec<f64>
where
    K: Fn(&DateTime<Utc>) -> usize,
{
    let source = match mode {
        SeasonMode::Additive => &ctx.detrended,
        SeasonMode::Multiplicative => &ctx.ratios,
    };
    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); groups];
    for (ts, v) in ctx.timestamps.iter().zip(source) {
        if v.is_finite() {
            buckets[key(ts)].push(*v);
        }
    }
    let means: Vec<Option<f64>> = buckets
        .iter()
        .map(|b| if b.is_empty() { None } else { Some(mean(b)) })
        .collect();

    (1..groups)
        .map(|g| match (means[0], means[g]) {
            (Some(reference), Some(m)) => match mode {
                SeasonMode::Additive => m - reference,
                SeasonMode::Multiplicative if reference.abs() > 1e-12 => m / reference - 1.0,
                SeasonMode::Multiplicative => 0.0,
            },
            _ => 0.0,
        })
        .collect()
}

fn fourier_guess(ctx: &GuessContext<'_>, period_days: f64, order: usize, mode: SeasonMode) -> Vec<f64> {
    let mut coefs = vec![0.0; 2 * order];
    let mut count = 0usize;
    for (ts, (e, r)) in ctx.timestamps.iter().zip(ctx.detrended.iter().zip(&ctx.ratios)) {
        let v = match mode {
            SeasonMode::Additive => *e,
            SeasonMode::Multiplicative => *r - 1.0,
        };
        if !v.is_finite() {
            continue;
        }
        count += 1;
        let phase = 2.0 * PI * epoch_days(ts) / period_days;
        for k in 1..=order {
            let angle = k as f64 * phase;
            coefs[2 * k - 2] += v * angle.sin();
            coefs[2 * k - 1] += v * angle.cos();
        }
    }
    if count > 0 {
        coefs.iter_mut().for_each(|c| *c *= 2.0 / count as f64);
    }
    coefs
}
