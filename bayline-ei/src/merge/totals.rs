//! Authoritative totals recomputation
//!
//! Vendor files carry pre-computed totals, but rounding conventions differ
//! between estimating systems and some exports only carry a gross figure.
//! The merge therefore recomputes every category total from line detail
//! with exact decimal arithmetic and keeps the vendor's own figure in a
//! separate column for reconciliation. Only a file with no line detail at
//! all falls back to the vendor total for its grand total.

use rust_decimal::Decimal;

use crate::model::{LineDetail, NormalizedPayload};

/// Category totals derived from one payload, rounded to cents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedTotals {
    pub parts_total: Decimal,
    pub labor_total: Decimal,
    pub other_total: Decimal,
    pub subtotal: Decimal,
    pub gst_amount: Decimal,
    pub pst_amount: Decimal,
    pub grand_total: Decimal,
}

/// Sum line detail into category totals.
///
/// Material pseudo-parts land in `parts_total` with ordinary parts. Lines
/// without detail contribute their extended amount according to their kind,
/// so a bare sublet row still reaches the grand total. Tax amounts pass
/// through from the parsed totals block; parsers cannot recompute them
/// because rates are jurisdictional and never present in the files.
pub fn compute_totals(payload: &NormalizedPayload) -> ComputedTotals {
    let mut parts_total = Decimal::ZERO;
    let mut labor_total = Decimal::ZERO;
    let mut other_total = Decimal::ZERO;

    for line in &payload.lines {
        match &line.detail {
            Some(LineDetail::Part(part)) => parts_total += part.extended_price(),
            Some(LineDetail::Labor(labor)) => labor_total += labor.extended_price(),
            Some(LineDetail::Other(other)) => other_total += other.price,
            None => other_total += line.amount,
        }
    }

    let subtotal = parts_total + labor_total + other_total;
    let gst_amount = payload.totals.gst.unwrap_or(Decimal::ZERO);
    let pst_amount = payload.totals.pst.unwrap_or(Decimal::ZERO);

    let grand_total = if payload.lines.is_empty() {
        payload.totals.vendor_total().unwrap_or(Decimal::ZERO)
    } else {
        subtotal + gst_amount + pst_amount
    };

    ComputedTotals {
        parts_total: parts_total.round_dp(2),
        labor_total: labor_total.round_dp(2),
        other_total: other_total.round_dp(2),
        subtotal: subtotal.round_dp(2),
        gst_amount: gst_amount.round_dp(2),
        pst_amount: pst_amount.round_dp(2),
        grand_total: grand_total.round_dp(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        EstimateLine, EstimateTotals, LaborInfo, LineKind, OtherChargesInfo, PartInfo,
    };

    fn part_line(number: u32, quantity: Decimal, unit_price: Decimal, material: bool) -> EstimateLine {
        EstimateLine {
            line_number: number,
            parent_line: None,
            description: "part".to_string(),
            kind: if material { LineKind::Material } else { LineKind::Part },
            taxable: true,
            amount: quantity * unit_price,
            detail: Some(LineDetail::Part(PartInfo {
                part_number: None,
                quantity,
                unit_price,
                part_type: None,
                is_material: material,
            })),
        }
    }

    fn labor_line(number: u32, hours: Decimal, rate: Decimal) -> EstimateLine {
        EstimateLine {
            line_number: number,
            parent_line: None,
            description: "labor".to_string(),
            kind: LineKind::Labor,
            taxable: true,
            amount: hours * rate,
            detail: Some(LineDetail::Labor(LaborInfo {
                labor_type: None,
                hours,
                rate,
            })),
        }
    }

    fn payload_with(lines: Vec<EstimateLine>, totals: EstimateTotals) -> NormalizedPayload {
        NormalizedPayload {
            identities: crate::model::JobIdentities::default(),
            customer: None,
            vehicle: None,
            estimate_date: None,
            lines,
            totals,
            flags: crate::model::RepairFlags::default(),
            insurance: crate::model::InsuranceInfo::default(),
            meta: crate::model::ImportMeta {
                source_system: crate::model::SourceSystem::Unknown,
                import_timestamp: chrono::Utc::now(),
                unknown_tags: Vec::new(),
                unknown_records: Vec::new(),
            },
        }
    }

    #[test]
    fn categories_sum_exactly_in_decimal() {
        // 2.5h x 65.00 must come out as 162.50, never 162.49999...
        let payload = payload_with(
            vec![
                part_line(1, Decimal::ONE, Decimal::new(45000, 2), false),
                labor_line(2, Decimal::new(25, 1), Decimal::new(6500, 2)),
                part_line(3, Decimal::ONE, Decimal::new(2735, 2), true),
            ],
            EstimateTotals {
                gross: None,
                net: None,
                gst: Some(Decimal::new(3199, 2)),
                pst: Some(Decimal::new(4479, 2)),
            },
        );

        let computed = compute_totals(&payload);
        assert_eq!(computed.parts_total, Decimal::new(47735, 2));
        assert_eq!(computed.labor_total, Decimal::new(16250, 2));
        assert_eq!(computed.other_total, Decimal::ZERO);
        assert_eq!(computed.subtotal, Decimal::new(63985, 2));
        assert_eq!(computed.grand_total, Decimal::new(71663, 2));
    }

    #[test]
    fn bare_lines_contribute_their_amount() {
        let sublet = EstimateLine {
            line_number: 4,
            parent_line: None,
            description: "Sublet glass".to_string(),
            kind: LineKind::Sublet,
            taxable: false,
            amount: Decimal::new(21000, 2),
            detail: None,
        };
        let charge = EstimateLine {
            line_number: 5,
            parent_line: None,
            description: "Hazardous waste".to_string(),
            kind: LineKind::Other,
            taxable: true,
            amount: Decimal::new(500, 2),
            detail: Some(LineDetail::Other(OtherChargesInfo {
                charge_type: Some("Waste".to_string()),
                price: Decimal::new(500, 2),
            })),
        };

        let payload = payload_with(vec![sublet, charge], EstimateTotals::default());
        let computed = compute_totals(&payload);
        assert_eq!(computed.other_total, Decimal::new(21500, 2));
        assert_eq!(computed.grand_total, Decimal::new(21500, 2));
    }

    #[test]
    fn empty_line_detail_falls_back_to_vendor_total() {
        let payload = payload_with(
            Vec::new(),
            EstimateTotals {
                gross: Some(Decimal::new(120000, 2)),
                net: Some(Decimal::new(115000, 2)),
                gst: None,
                pst: None,
            },
        );

        let computed = compute_totals(&payload);
        assert_eq!(computed.subtotal, Decimal::ZERO);
        // net outranks gross, matching the vendor_total accessor
        assert_eq!(computed.grand_total, Decimal::new(115000, 2));
    }

    #[test]
    fn totals_round_to_cents_at_the_edge() {
        // 3 x 11.111 = 33.333, rounds to 33.33
        let payload = payload_with(
            vec![part_line(1, Decimal::new(3, 0), Decimal::new(11111, 3), false)],
            EstimateTotals::default(),
        );
        let computed = compute_totals(&payload);
        assert_eq!(computed.parts_total, Decimal::new(3333, 2));
        assert_eq!(computed.grand_total, Decimal::new(3333, 2));
    }
}
