// src/allocate.rs
//
// Spreads the packing list's net weight over invoice lines so that the
// lines add up to the stated total exactly.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ProcessingError;
use crate::extract::cells::round_half_up;
use crate::extract::{AllocatedItem, InvoiceItem, PackingItem, PackingTotals};

const MIN_PRECISION: u32 = 2;
const MAX_PRECISION: u32 = 5;

/// Largest accepted gap between the packing rows and the stated total.
fn sum_tolerance() -> Decimal {
    Decimal::new(1, 1)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub items: Vec<AllocatedItem>,
    /// Decimal places the per-part weights were rounded to; line weights
    /// carry one more.
    pub precision: u32,
}

/// Per-part sums in first-seen order.
#[derive(Debug, Default)]
struct PartWeights {
    parts: Vec<(String, Decimal, Decimal)>,
    index: HashMap<String, usize>,
}

impl PartWeights {
    fn add(&mut self, part_no: &str, nw: Decimal, qty: Decimal) {
        let key = part_no.trim();
        match self.index.get(key) {
            Some(&i) => {
                self.parts[i].1 += nw;
                self.parts[i].2 += qty;
            }
            None => {
                self.index.insert(key.to_string(), self.parts.len());
                self.parts.push((key.to_string(), nw, qty));
            }
        }
    }

    fn weights(&self) -> impl Iterator<Item = (&str, Decimal)> + '_ {
        self.parts.iter().map(|(part, nw, _)| (part.as_str(), *nw))
    }
}

fn aggregate(packing: &[PackingItem]) -> Result<PartWeights, ProcessingError> {
    let mut agg = PartWeights::default();
    for item in packing {
        agg.add(&item.part_no, item.nw, item.qty);
    }
    if let Some((part, nw, _)) = agg.parts.iter().find(|(_, nw, _)| *nw <= Decimal::ZERO) {
        return Err(ProcessingError::AggregatedWeightNonPositive {
            part_no: part.clone(),
            weight: *nw,
        });
    }
    if let Some((part, _, qty)) = agg.parts.iter().find(|(_, _, qty)| *qty <= Decimal::ZERO) {
        return Err(ProcessingError::AggregatedQuantityZero {
            part_no: part.clone(),
            qty: *qty,
        });
    }
    debug!(parts = agg.parts.len(), "packing weights aggregated");
    Ok(agg)
}

fn check_packing_sum(agg: &PartWeights, total_nw: Decimal) -> Result<(), ProcessingError> {
    let packing_sum: Decimal = agg.weights().map(|(_, w)| w).sum();
    let difference = (packing_sum - total_nw).abs();
    if difference > sum_tolerance() {
        return Err(ProcessingError::PackingSumMismatch {
            packing_sum,
            total_nw,
            difference,
        });
    }
    Ok(())
}

fn rounded_sum(agg: &PartWeights, dp: u32) -> Decimal {
    agg.weights().map(|(_, w)| round_half_up(w, dp)).sum()
}

/// N from the total's precision if the rounded parts hit the total, N+1
/// otherwise; then more places while any part would round to zero.
fn choose_precision(
    agg: &PartWeights,
    total_nw: Decimal,
    total_precision: u32,
) -> Result<u32, ProcessingError> {
    let base = total_precision.clamp(MIN_PRECISION, MAX_PRECISION);
    let sum_at_base = rounded_sum(agg, base);
    let mut precision = if sum_at_base == total_nw {
        debug!(precision = base, "rounded parts match total");
        base
    } else {
        let next = (base + 1).min(MAX_PRECISION);
        let sum_at_next = rounded_sum(agg, next);
        debug!(
            base,
            %sum_at_base,
            next,
            %sum_at_next,
            %total_nw,
            exact = sum_at_next == total_nw,
            "escalating precision"
        );
        next
    };

    loop {
        let zero = agg
            .weights()
            .find(|(_, w)| round_half_up(*w, precision).is_zero());
        match zero {
            None => return Ok(precision),
            Some((part, weight)) if precision == MAX_PRECISION => {
                return Err(ProcessingError::WeightRoundsToZero {
                    part_no: part.to_string(),
                    weight,
                });
            }
            Some((part, _)) => {
                debug!(part, precision, "part rounds to zero, adding a place");
                precision += 1;
            }
        }
    }
}

/// Rounds every part; the last one takes whatever makes the sum exact.
fn round_parts(
    agg: &PartWeights,
    precision: u32,
    total_nw: Decimal,
) -> Result<Vec<(String, Decimal)>, ProcessingError> {
    let mut rounded: Vec<(String, Decimal)> = agg
        .weights()
        .map(|(part, w)| (part.to_string(), round_half_up(w, precision)))
        .collect();
    if let Some(((last_part, last_weight), others)) = rounded.split_last_mut() {
        let others_sum: Decimal = others.iter().map(|(_, w)| *w).sum();
        let remainder = total_nw - others_sum;
        if remainder < Decimal::ZERO {
            return Err(ProcessingError::NegativeRemainder {
                part_no: last_part.clone(),
                remainder,
            });
        }
        *last_weight = remainder;
    }
    Ok(rounded)
}

/// Splits each part's weight across its invoice lines by quantity.
fn distribute(
    parts: &[(String, Decimal)],
    invoice: &[InvoiceItem],
    precision: u32,
) -> Result<Vec<Decimal>, ProcessingError> {
    let line_precision = precision + 1;

    let mut lines_by_part: Vec<(&str, Vec<usize>)> = Vec::new();
    let mut line_index: HashMap<&str, usize> = HashMap::new();
    for (i, item) in invoice.iter().enumerate() {
        let key = item.part_no.trim();
        let slot = *line_index.entry(key).or_insert_with(|| {
            lines_by_part.push((key, Vec::new()));
            lines_by_part.len() - 1
        });
        lines_by_part[slot].1.push(i);
    }

    let mut weights = vec![Decimal::ZERO; invoice.len()];
    let mut packing_only = Vec::new();
    for (part, part_weight) in parts {
        let Some(&slot) = line_index.get(part.as_str()) else {
            packing_only.push(part.clone());
            continue;
        };
        let lines = &lines_by_part[slot].1;
        let total_qty: Decimal = lines.iter().map(|&i| invoice[i].qty).sum();
        if total_qty.is_zero() && lines.len() > 1 {
            return Err(ProcessingError::AggregatedQuantityZero {
                part_no: part.clone(),
                qty: total_qty,
            });
        }

        let mut assigned = Decimal::ZERO;
        if let Some((&last, rest)) = lines.split_last() {
            for &i in rest {
                let share = *part_weight * (invoice[i].qty / total_qty);
                let weight = round_half_up(share, line_precision);
                weights[i] = weight;
                assigned += weight;
            }
            weights[last] = *part_weight - assigned;
        }
    }

    let invoice_only: Vec<String> = lines_by_part
        .iter()
        .filter(|(part, _)| !parts.iter().any(|(p, _)| p.as_str() == *part))
        .map(|(part, _)| part.to_string())
        .collect();
    if !invoice_only.is_empty() {
        return Err(ProcessingError::InvoicePartsUnmatched {
            parts: invoice_only,
        });
    }
    if !packing_only.is_empty() {
        return Err(ProcessingError::PackingPartsUnmatched {
            parts: packing_only,
        });
    }
    Ok(weights)
}

pub fn allocate_weights(
    invoice: &[InvoiceItem],
    packing: &[PackingItem],
    totals: &PackingTotals,
) -> Result<Allocation, ProcessingError> {
    let total_nw = totals.total_nw;

    let agg = aggregate(packing)?;
    check_packing_sum(&agg, total_nw)?;
    let precision = choose_precision(&agg, total_nw, totals.total_nw_precision)?;
    let parts = round_parts(&agg, precision, total_nw)?;
    let weights = distribute(&parts, invoice, precision)?;

    let allocated: Decimal = weights.iter().copied().sum();
    if allocated != total_nw {
        return Err(ProcessingError::FinalSumMismatch { allocated, total_nw });
    }

    info!(
        parts = parts.len(),
        lines = invoice.len(),
        precision,
        %total_nw,
        "weights allocated"
    );
    let items = invoice
        .iter()
        .cloned()
        .zip(weights)
        .map(|(item, allocated_weight)| AllocatedItem {
            item,
            allocated_weight,
        })
        .collect();
    Ok(Allocation { items, precision })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::d;

    fn line(part: &str, qty: &str) -> InvoiceItem {
        InvoiceItem {
            part_no: part.to_string(),
            po_no: "PO-1".to_string(),
            qty: d(qty),
            price: d("1"),
            amount: d(qty),
            currency: "USD".to_string(),
            coo: "CHINA".to_string(),
            cod: None,
            brand: "ACME".to_string(),
            brand_type: "境外品牌".to_string(),
            model: "M".to_string(),
            inv_no: Some("INV-1".to_string()),
            serial: None,
        }
    }

    fn pack(part: &str, qty: &str, nw: &str) -> PackingItem {
        PackingItem {
            part_no: part.to_string(),
            qty: d(qty),
            nw: d(nw),
            is_first_row_of_merge: true,
            source_row: 10,
        }
    }

    fn totals(nw: &str, precision: u32) -> PackingTotals {
        PackingTotals {
            total_nw: d(nw),
            total_nw_precision: precision,
            total_gw: d(nw) + d("1"),
            total_gw_precision: precision,
            total_packets: Some(1),
        }
    }

    fn weights(allocation: &Allocation) -> Vec<String> {
        allocation
            .items
            .iter()
            .map(|i| i.allocated_weight.to_string())
            .collect()
    }

    #[test]
    fn test_precision_escalates_to_match_total() {
        let invoice = [line("A", "1"), line("B", "1")];
        let packing = [pack("A", "1", "3.335"), pack("B", "1", "6.665")];
        let result = allocate_weights(&invoice, &packing, &totals("10.0", 1)).unwrap();
        assert_eq!(result.precision, 3);
        assert_eq!(weights(&result), ["3.335", "6.665"]);
    }

    #[test]
    fn test_same_part_rows_sum_before_rounding() {
        let invoice = [line("A", "4"), line("A", "6")];
        let packing = [pack("A", "4", "3.335"), pack("A", "6", "6.665")];
        let result = allocate_weights(&invoice, &packing, &totals("10.0", 2)).unwrap();
        // 10.000 already matches at two places; only split parts escalate.
        assert_eq!(result.precision, 2);
        let sum: Decimal = result.items.iter().map(|i| i.allocated_weight).sum();
        assert_eq!(sum, d("10.0"));
        assert_eq!(weights(&result), ["4.000", "6.000"]);
    }

    #[test]
    fn test_proportional_split_by_quantity() {
        let invoice = [line("A", "3"), line("A", "7")];
        let packing = [pack("A", "10", "1.00")];
        let result = allocate_weights(&invoice, &packing, &totals("1.00", 2)).unwrap();
        assert_eq!(result.precision, 2);
        assert_eq!(weights(&result), ["0.300", "0.700"]);
    }

    #[test]
    fn test_rows_of_one_part_are_summed() {
        let invoice = [line(" A ", "5")];
        let packing = [pack("A", "3", "1.25"), pack("A", "2", "0")];
        let result = allocate_weights(&invoice, &packing, &totals("1.25", 2)).unwrap();
        assert_eq!(result.items[0].allocated_weight, d("1.25"));
    }

    #[test]
    fn test_sum_tolerance_boundary() {
        let invoice = [line("A", "1")];
        let ok = allocate_weights(&invoice, &[pack("A", "1", "10.1")], &totals("10.0", 1));
        assert_eq!(ok.unwrap().items[0].allocated_weight, d("10.0"));

        let err = allocate_weights(&invoice, &[pack("A", "1", "10.1000001")], &totals("10.0", 1))
            .unwrap_err();
        assert_eq!(err.code(), "ERR_047");
    }

    #[test]
    fn test_unmatched_parts_reported_separately() {
        let invoice = [line("A", "1"), line("X", "1")];
        let packing = [pack("A", "1", "1"), pack("Y", "1", "1")];
        let err = allocate_weights(&invoice, &packing, &totals("2", 2)).unwrap_err();
        assert_eq!(
            err,
            ProcessingError::InvoicePartsUnmatched {
                parts: vec!["X".into()]
            }
        );

        let invoice = [line("A", "1")];
        let err = allocate_weights(&invoice, &packing, &totals("2", 2)).unwrap_err();
        assert_eq!(
            err,
            ProcessingError::PackingPartsUnmatched {
                parts: vec!["Y".into()]
            }
        );
    }

    #[test]
    fn test_zero_weight_escalation() {
        let invoice = [line("A", "1"), line("B", "1")];
        let packing = [pack("A", "1", "4.996"), pack("B", "1", "0.004")];
        let result = allocate_weights(&invoice, &packing, &totals("5.00", 2)).unwrap();
        assert_eq!(result.precision, 3);

        let packing = [pack("A", "1", "5"), pack("B", "1", "0.000001")];
        let err = allocate_weights(&invoice, &packing, &totals("5.00", 2)).unwrap_err();
        assert_eq!(
            err,
            ProcessingError::WeightRoundsToZero {
                part_no: "B".into(),
                weight: d("0.000001")
            }
        );
    }

    #[test]
    fn test_negative_remainder() {
        let invoice = [line("A", "1"), line("B", "1")];
        let packing = [pack("A", "1", "5.08"), pack("B", "1", "0.01")];
        let err = allocate_weights(&invoice, &packing, &totals("5.0", 1)).unwrap_err();
        assert!(matches!(err, ProcessingError::NegativeRemainder { part_no, .. } if part_no == "B"));
    }

    #[test]
    fn test_aggregate_guards() {
        let invoice = [line("A", "1")];
        let err = allocate_weights(&invoice, &[pack("A", "1", "0")], &totals("0", 2)).unwrap_err();
        assert_eq!(err.code(), "ERR_042");

        let err = allocate_weights(&invoice, &[pack("A", "0", "1")], &totals("1", 2)).unwrap_err();
        assert_eq!(err.code(), "ERR_045");
    }

    #[test]
    fn test_allocation_sums_exactly() {
        let invoice = [line("A", "1"), line("A", "1"), line("A", "1"), line("B", "2")];
        let packing = [pack("A", "3", "1"), pack("B", "2", "2.33")];
        let result = allocate_weights(&invoice, &packing, &totals("3.33", 2)).unwrap();
        let sum: Decimal = result.items.iter().map(|i| i.allocated_weight).sum();
        assert_eq!(sum, d("3.33"));
        assert_eq!(result.items[0].allocated_weight, d("0.333"));
        assert_eq!(result.items[2].allocated_weight, d("0.334"));
    }
}
