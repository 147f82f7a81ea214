use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::error::GreenlightError;
use crate::types::*;
use crate::GreenlightResult;

/// Tolerance for channel shares summing to 1.
const SHARE_TOLERANCE: Decimal = dec!(0.000001);

// ---------------------------------------------------------------------------
// Template types
// ---------------------------------------------------------------------------

/// How a channel's revenue is spread across the horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimingProfile {
    /// Geometric decay from an early peak (theatrical box office)
    FrontLoaded { start: Quarter, decay: Rate },
    /// Mirror image: geometric ramp toward a late peak (library value)
    BackLoaded { end: Quarter, decay: Rate },
    /// Uniform over a window (flat licensing payments)
    Even { start: Quarter, quarters: u32 },
    /// Single-quarter receipt (minimum guarantee, pre-sale delivery payment)
    LumpSum { quarter: Quarter },
}

/// A named revenue channel with its share of ultimate revenue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueChannel {
    pub name: String,
    /// Fraction of total ultimate revenue earned through this channel
    pub share: Rate,
    pub profile: TimingProfile,
}

/// A distribution-window template: a set of channels whose shares sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueTemplate {
    pub name: String,
    pub channels: Vec<RevenueChannel>,
}

/// Named template collection. Built explicitly so tests can substitute
/// fixtures; never ambient state.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, RevenueTemplate>,
}

impl TemplateLibrary {
    pub fn new(templates: Vec<RevenueTemplate>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        }
    }

    /// The stock distribution-window templates.
    pub fn standard() -> Self {
        Self::new(vec![
            RevenueTemplate {
                name: "theatrical_led".into(),
                channels: vec![
                    RevenueChannel {
                        name: "theatrical".into(),
                        share: dec!(0.40),
                        profile: TimingProfile::FrontLoaded {
                            start: 0,
                            decay: dec!(0.5),
                        },
                    },
                    RevenueChannel {
                        name: "home_entertainment".into(),
                        share: dec!(0.25),
                        profile: TimingProfile::FrontLoaded {
                            start: 2,
                            decay: dec!(0.6),
                        },
                    },
                    RevenueChannel {
                        name: "pay_tv".into(),
                        share: dec!(0.20),
                        profile: TimingProfile::Even {
                            start: 4,
                            quarters: 8,
                        },
                    },
                    RevenueChannel {
                        name: "library".into(),
                        share: dec!(0.15),
                        profile: TimingProfile::BackLoaded {
                            end: 20,
                            decay: dec!(0.85),
                        },
                    },
                ],
            },
            RevenueTemplate {
                name: "streaming_first".into(),
                channels: vec![
                    RevenueChannel {
                        name: "license_minimum".into(),
                        share: dec!(0.55),
                        profile: TimingProfile::LumpSum { quarter: 1 },
                    },
                    RevenueChannel {
                        name: "performance_bonus".into(),
                        share: dec!(0.25),
                        profile: TimingProfile::Even {
                            start: 2,
                            quarters: 6,
                        },
                    },
                    RevenueChannel {
                        name: "secondary_windows".into(),
                        share: dec!(0.20),
                        profile: TimingProfile::FrontLoaded {
                            start: 8,
                            decay: dec!(0.7),
                        },
                    },
                ],
            },
            RevenueTemplate {
                name: "library_long_tail".into(),
                channels: vec![
                    RevenueChannel {
                        name: "initial_release".into(),
                        share: dec!(0.30),
                        profile: TimingProfile::FrontLoaded {
                            start: 0,
                            decay: dec!(0.6),
                        },
                    },
                    RevenueChannel {
                        name: "catalog".into(),
                        share: dec!(0.70),
                        profile: TimingProfile::Even {
                            start: 2,
                            quarters: 20,
                        },
                    },
                ],
            },
        ])
    }

    pub fn get(&self, name: &str) -> GreenlightResult<&RevenueTemplate> {
        self.templates
            .get(name)
            .ok_or_else(|| GreenlightError::UnknownTemplate(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Revenue expected in one quarter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarterRevenue {
    pub quarter: Quarter,
    pub amount: Money,
}

/// The projected quarterly inflow series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueProjection {
    pub quarters: Vec<QuarterRevenue>,
    pub total: Money,
    pub horizon: Quarter,
}

impl RevenueProjection {
    /// The series as a plain (quarter, amount) vector for the waterfall.
    pub fn series(&self) -> Vec<(Quarter, Money)> {
        self.quarters.iter().map(|q| (q.quarter, q.amount)).collect()
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Per-quarter weights for one profile over the horizon, normalized to sum
/// to 1 so truncation at the horizon never loses revenue.
fn profile_weights(profile: &TimingProfile, horizon: Quarter) -> GreenlightResult<Vec<Decimal>> {
    let h = horizon as usize;
    let mut weights = vec![Decimal::ZERO; h];

    match profile {
        TimingProfile::FrontLoaded { start, decay } => {
            if *decay <= Decimal::ZERO || *decay >= Decimal::ONE {
                return Err(GreenlightError::InvalidInput {
                    field: "decay".into(),
                    reason: "Geometric decay must be in (0, 1)".into(),
                });
            }
            if *start >= horizon {
                return Err(GreenlightError::InvalidInput {
                    field: "start".into(),
                    reason: format!("Profile start {start} is beyond horizon {horizon}"),
                });
            }
            for (i, w) in weights.iter_mut().enumerate().skip(*start as usize) {
                *w = decay.powu((i - *start as usize) as u64);
            }
        }
        TimingProfile::BackLoaded { end, decay } => {
            if *decay <= Decimal::ZERO || *decay >= Decimal::ONE {
                return Err(GreenlightError::InvalidInput {
                    field: "decay".into(),
                    reason: "Geometric decay must be in (0, 1)".into(),
                });
            }
            let end = (*end).min(horizon - 1) as usize;
            for (i, w) in weights.iter_mut().enumerate().take(end + 1) {
                *w = decay.powu((end - i) as u64);
            }
        }
        TimingProfile::Even { start, quarters } => {
            if *quarters == 0 {
                return Err(GreenlightError::InvalidInput {
                    field: "quarters".into(),
                    reason: "Even window must span at least one quarter".into(),
                });
            }
            if *start >= horizon {
                return Err(GreenlightError::InvalidInput {
                    field: "start".into(),
                    reason: format!("Profile start {start} is beyond horizon {horizon}"),
                });
            }
            let last = ((*start + *quarters) as usize).min(h);
            for w in weights.iter_mut().take(last).skip(*start as usize) {
                *w = Decimal::ONE;
            }
        }
        TimingProfile::LumpSum { quarter } => {
            if *quarter >= horizon {
                return Err(GreenlightError::InvalidInput {
                    field: "quarter".into(),
                    reason: format!("Lump-sum quarter {quarter} is beyond horizon {horizon}"),
                });
            }
            weights[*quarter as usize] = Decimal::ONE;
        }
    }

    let sum: Decimal = weights.iter().sum();
    if sum.is_zero() {
        return Err(GreenlightError::InvalidInput {
            field: "profile".into(),
            reason: "Profile places no weight inside the horizon".into(),
        });
    }
    for w in &mut weights {
        *w /= sum;
    }
    Ok(weights)
}

/// Expand a total-ultimate-revenue figure into a quarterly inflow series.
///
/// Each channel's share is spread across the horizon per its timing profile;
/// the output is the per-quarter sum across channels. Deterministic and
/// side-effect-free.
pub fn project(
    total_revenue: Money,
    template: &RevenueTemplate,
    horizon: Quarter,
) -> GreenlightResult<ComputationOutput<RevenueProjection>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    if total_revenue < Decimal::ZERO {
        return Err(GreenlightError::InvalidInput {
            field: "total_revenue".into(),
            reason: "Total revenue cannot be negative".into(),
        });
    }
    if horizon == 0 {
        return Err(GreenlightError::InvalidInput {
            field: "horizon".into(),
            reason: "Horizon must be at least one quarter".into(),
        });
    }
    if template.channels.is_empty() {
        return Err(GreenlightError::InsufficientData(format!(
            "Template {} has no channels",
            template.name
        )));
    }

    let share_sum: Decimal = template.channels.iter().map(|c| c.share).sum();
    if (share_sum - Decimal::ONE).abs() > SHARE_TOLERANCE {
        return Err(GreenlightError::InvalidInput {
            field: "channels".into(),
            reason: format!(
                "Channel shares in template {} sum to {share_sum}, expected 1",
                template.name
            ),
        });
    }

    let mut amounts = vec![Decimal::ZERO; horizon as usize];
    for channel in &template.channels {
        let channel_total = total_revenue * channel.share;
        let weights = profile_weights(&channel.profile, horizon)?;
        for (i, w) in weights.iter().enumerate() {
            amounts[i] += channel_total * w;
        }
    }

    let quarters: Vec<QuarterRevenue> = amounts
        .into_iter()
        .enumerate()
        .map(|(i, amount)| QuarterRevenue {
            quarter: i as Quarter,
            amount,
        })
        .collect();

    let output = RevenueProjection {
        quarters,
        total: total_revenue,
        horizon,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Quarterly Revenue Projection",
        &serde_json::json!({
            "template": template.name,
            "total_revenue": total_revenue.to_string(),
            "horizon_quarters": horizon,
            "num_channels": template.channels.len(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Look up a template by name and project. Unknown names fail with
/// `UnknownTemplate`.
pub fn project_named(
    total_revenue: Money,
    template_name: &str,
    library: &TemplateLibrary,
    horizon: Quarter,
) -> GreenlightResult<ComputationOutput<RevenueProjection>> {
    let template = library.get(template_name)?;
    project(total_revenue, template, horizon)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
