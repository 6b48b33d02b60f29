//! # Layer-to-pen assignment and execution ordering.
//!
//! Maps detected drawing layers to available pens and orders layer execution
//! to minimize pen swaps.
//!
//! ## Detection
//! A drawing is single-pen unless it has more than one non-hidden layer or
//! any layer carries a pen annotation. Hidden layers never take part in
//! assignment or execution.
//!
//! ## Assignment
//! Each visible layer maps to exactly one pen: an explicit user mapping wins;
//! otherwise the declared hint is matched against the pool
//! ([`PenPool::match_hint`]); unannotated layers fall back to the pool's
//! default pen. A layer no pool pen can satisfy fails the whole assignment
//! with [`OrchestratorError::NoCompatiblePen`].
//!
//! ## Ordering
//! For a fixed assignment the swap-minimal order is obtained by stable
//! grouping: pens in first-appearance z-order, z-order preserved inside each
//! group. The resulting swap count equals the number of pen groups minus one,
//! which is optimal — no ordering of the same assignment can do better, so no
//! search is needed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::fsm::Layer;
use crate::pens::PenPool;

/// Ordered execution plan produced by the assignment optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotPlan {
    /// Indices into the job's layer arena, in execution order. Hidden layers
    /// are absent.
    pub order: Vec<usize>,
    /// Pen swaps the naive z-order would have required.
    pub swaps_before: u32,
    /// Pen swaps the optimized order requires.
    pub swaps_after: u32,
    /// Whether more than one pen takes part.
    pub multi_pen: bool,
}

/// True when the layer set needs multi-pen treatment: more than one visible
/// layer, or any layer-control annotation.
pub fn is_multi_pen(layers: &[Layer]) -> bool {
    let visible = layers.iter().filter(|l| !l.hidden).count();
    visible > 1 || layers.iter().any(|l| l.pen_hint.is_some())
}

/// Assigns exactly one pen to every visible layer, in place.
///
/// `explicit` maps layer names to pen ids and takes precedence over hint
/// matching. Returns [`OrchestratorError::NoCompatiblePen`] naming the first
/// layer that cannot be satisfied; in that case no layer is modified.
pub fn assign_pens(
    layers: &mut [Layer],
    pool: &PenPool,
    explicit: &HashMap<String, String>,
) -> Result<(), OrchestratorError> {
    // Resolve everything before mutating so a late failure leaves the arena
    // untouched.
    let mut resolved: Vec<(usize, String)> = Vec::new();
    for (idx, layer) in layers.iter().enumerate() {
        if layer.hidden {
            continue;
        }
        let pen_id = if let Some(mapped) = explicit.get(&layer.name) {
            match pool.get(mapped) {
                Some(pen) => pen.id.clone(),
                None => {
                    return Err(OrchestratorError::NoCompatiblePen {
                        layer: layer.name.clone(),
                    });
                }
            }
        } else if let Some(hint) = &layer.pen_hint {
            match pool.match_hint(hint) {
                Some(pen) => pen.id.clone(),
                None => {
                    return Err(OrchestratorError::NoCompatiblePen {
                        layer: layer.name.clone(),
                    });
                }
            }
        } else {
            match pool.default_pen() {
                Some(pen) => pen.id.clone(),
                None => {
                    return Err(OrchestratorError::NoCompatiblePen {
                        layer: layer.name.clone(),
                    });
                }
            }
        };
        resolved.push((idx, pen_id));
    }

    for (idx, pen_id) in resolved {
        layers[idx].assigned_pen = Some(pen_id);
    }
    Ok(())
}

/// Orders assigned layers for execution and reports swap counts.
///
/// Visible layers are taken in z-order (the naive order), then stably grouped
/// by assigned pen: groups appear in first-appearance order, and the original
/// relative z-order is preserved inside each group.
///
/// # Panics
/// Never panics on unassigned layers; they are skipped, since the
/// orchestrator only calls this after [`assign_pens`] succeeded.
pub fn order_layers(layers: &[Layer]) -> PlotPlan {
    let mut naive: Vec<usize> = (0..layers.len())
        .filter(|&i| !layers[i].hidden && layers[i].assigned_pen.is_some())
        .collect();
    naive.sort_by_key(|&i| layers[i].z_index);

    let pen_of = |i: usize| layers[i].assigned_pen.as_deref().unwrap_or_default();
    let swaps_before = count_swaps(naive.iter().map(|&i| pen_of(i)));

    // Stable grouping: first-appearance pen order, z-order within a group.
    let mut group_order: Vec<&str> = Vec::new();
    for &i in &naive {
        let pen = pen_of(i);
        if !group_order.contains(&pen) {
            group_order.push(pen);
        }
    }
    let mut order: Vec<usize> = Vec::with_capacity(naive.len());
    for pen in &group_order {
        order.extend(naive.iter().copied().filter(|&i| pen_of(i) == *pen));
    }

    let swaps_after = count_swaps(order.iter().map(|&i| pen_of(i)));

    PlotPlan {
        order,
        swaps_before,
        swaps_after,
        multi_pen: group_order.len() > 1,
    }
}

/// Counts pen changes across an ordered pen sequence.
fn count_swaps<'a>(pens: impl Iterator<Item = &'a str>) -> u32 {
    let mut swaps = 0;
    let mut prev: Option<&str> = None;
    for pen in pens {
        if let Some(p) = prev {
            if p != pen {
                swaps += 1;
            }
        }
        prev = Some(pen);
    }
    swaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PenHint;
    use crate::pens::Pen;

    fn layer(name: &str, z: u32) -> Layer {
        Layer::new(name, z)
    }

    fn tagged(name: &str, z: u32, width: f64) -> Layer {
        let mut l = Layer::new(name, z);
        l.pen_hint = Some(PenHint {
            width_mm: width,
            color: None,
        });
        l
    }

    fn assigned(name: &str, z: u32, pen: &str) -> Layer {
        let mut l = Layer::new(name, z);
        l.assigned_pen = Some(pen.to_string());
        l
    }

    #[test]
    fn single_visible_unannotated_layer_is_single_pen() {
        let layers = vec![layer("ink", 0)];
        assert!(!is_multi_pen(&layers));
    }

    #[test]
    fn hidden_layers_do_not_trigger_multi_pen() {
        let mut guides = layer("guides", 1);
        guides.hidden = true;
        let layers = vec![layer("ink", 0), guides];
        assert!(!is_multi_pen(&layers));
    }

    #[test]
    fn annotation_forces_multi_pen_path() {
        let layers = vec![tagged("ink", 0, 0.3)];
        assert!(is_multi_pen(&layers));
    }

    #[test]
    fn explicit_mapping_overrides_hint() {
        let pool = PenPool::new(vec![
            Pen::new("fine", 0.3, "black"),
            Pen::new("broad", 0.8, "black"),
        ]);
        let mut layers = vec![tagged("ink", 0, 0.3)];
        let explicit = HashMap::from([("ink".to_string(), "broad".to_string())]);
        assign_pens(&mut layers, &pool, &explicit).unwrap();
        assert_eq!(layers[0].assigned_pen.as_deref(), Some("broad"));
    }

    #[test]
    fn incompatible_hint_fails_and_mutates_nothing() {
        let pool = PenPool::new(vec![Pen::new("broad", 0.8, "black")]);
        let mut layers = vec![layer("base", 0), tagged("detail", 1, 0.1)];
        let err = assign_pens(&mut layers, &pool, &HashMap::new()).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::NoCompatiblePen { ref layer } if layer == "detail"
        ));
        assert!(layers.iter().all(|l| l.assigned_pen.is_none()));
    }

    #[test]
    fn aba_reorders_to_aab_halving_swaps() {
        let layers = vec![
            assigned("one", 0, "A"),
            assigned("two", 1, "B"),
            assigned("three", 2, "A"),
        ];
        let plan = order_layers(&layers);
        assert_eq!(plan.swaps_before, 2);
        assert_eq!(plan.swaps_after, 1);
        assert_eq!(plan.order, vec![0, 2, 1]);
        assert!(plan.multi_pen);
    }

    #[test]
    fn optimized_swaps_equal_runs_minus_one() {
        let layers = vec![
            assigned("a", 0, "A"),
            assigned("b", 1, "B"),
            assigned("c", 2, "C"),
            assigned("d", 3, "B"),
            assigned("e", 4, "A"),
        ];
        let plan = order_layers(&layers);
        let distinct_pens = 3;
        assert_eq!(plan.swaps_after, distinct_pens - 1);
        assert!(plan.swaps_after <= plan.swaps_before);
    }

    #[test]
    fn z_order_preserved_within_groups() {
        let layers = vec![
            assigned("a1", 0, "A"),
            assigned("b1", 1, "B"),
            assigned("a2", 2, "A"),
            assigned("b2", 3, "B"),
        ];
        let plan = order_layers(&layers);
        assert_eq!(plan.order, vec![0, 2, 1, 3]);
    }

    #[test]
    fn single_pen_plan_has_no_swaps() {
        let layers = vec![assigned("a", 0, "A"), assigned("b", 1, "A")];
        let plan = order_layers(&layers);
        assert_eq!(plan.swaps_before, 0);
        assert_eq!(plan.swaps_after, 0);
        assert!(!plan.multi_pen);
    }
}
