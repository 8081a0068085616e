//! EMS estimate parser
//!
//! EMS is the legacy pipe-delimited export: one record per line, the first
//! field naming the record type. Detail records (`PRT`, `LAB`, `MTL`) join
//! to their `LIN` row through a shared line number. Record types this
//! parser does not know are logged into `unknown_tags` with their raw
//! fields retained in `unknown_records`; a file with zero recognizable
//! records is rejected outright.

use super::{
    apply_description_flags, classify_party, line_kind_from, normalize_phone, opt_clean,
    parse_bool_flag, parse_decimal, parse_estimate_date, parse_i32, parse_i64, parse_u32,
    push_joined_line, LineSeed, ParseSession,
};
use crate::error::ParseError;
use crate::model::{
    CustomerInfo, EstimateLine, EstimateTotals, InsuranceInfo, JobIdentities, LaborInfo,
    LineKind, NormalizedPayload, OtherChargesInfo, PartInfo, PhoneSet, PostalAddress,
    RepairFlags, SourceSystem, VehicleInfo,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

/// Records bucketed by type. Header-style records keep their first
/// occurrence; repeatable records keep all of them in file order.
#[derive(Default)]
struct RecordSet {
    hdr: Option<Vec<String>>,
    clm: Option<Vec<String>>,
    cst: Option<Vec<String>>,
    veh: Option<Vec<String>>,
    est: Option<Vec<String>>,
    lin: Vec<Vec<String>>,
    prt: Vec<Vec<String>>,
    lab: Vec<Vec<String>>,
    mtl: Vec<Vec<String>>,
    tot: Vec<Vec<String>>,
    known: usize,
}

/// Parse one EMS export into the canonical payload.
pub fn parse_ems(content: &str) -> Result<NormalizedPayload, ParseError> {
    let mut session = ParseSession::new();
    let set = collect_records(content, &mut session)?;

    let source_system = set
        .hdr
        .as_ref()
        .and_then(|hdr| field(hdr, 0))
        .map(SourceSystem::from_application_name)
        .unwrap_or(SourceSystem::Unknown);

    let customer = build_customer(&set);
    let vehicle = build_vehicle(&set);
    let lines = build_lines(&set);
    let totals = build_totals(&set);
    let estimate_date = build_estimate_date(&set);
    let insurance = build_insurance(&set);

    let identities = JobIdentities {
        ro_number: set.est.as_ref().and_then(|est| opt_clean(field(est, 0))),
        claim_number: set.clm.as_ref().and_then(|clm| opt_clean(field(clm, 0))),
        vin: vehicle.as_ref().and_then(|v| v.vin.clone()),
    };

    let mut flags = RepairFlags::default();
    for line in &lines {
        apply_description_flags(&mut flags, &line.description);
    }

    debug!(
        source = %source_system,
        lines = lines.len(),
        "parsed EMS estimate"
    );

    Ok(NormalizedPayload {
        identities,
        customer,
        vehicle,
        estimate_date,
        lines,
        totals,
        flags,
        insurance,
        meta: session.into_meta(source_system),
    })
}

fn collect_records(content: &str, session: &mut ParseSession) -> Result<RecordSet, ParseError> {
    let mut set = RecordSet::default();

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let mut segments = line.split('|');
        let tag = match segments.next() {
            Some(t) => t.trim().to_ascii_uppercase(),
            None => continue,
        };
        let fields: Vec<String> = segments.map(|f| f.trim().to_string()).collect();

        match tag.as_str() {
            "HDR" => {
                if set.hdr.is_none() {
                    set.hdr = Some(fields);
                }
                set.known += 1;
            }
            "CLM" => {
                if set.clm.is_none() {
                    set.clm = Some(fields);
                }
                set.known += 1;
            }
            "CST" => {
                if set.cst.is_none() {
                    set.cst = Some(fields);
                }
                set.known += 1;
            }
            "VEH" => {
                if set.veh.is_none() {
                    set.veh = Some(fields);
                }
                set.known += 1;
            }
            "EST" => {
                if set.est.is_none() {
                    set.est = Some(fields);
                }
                set.known += 1;
            }
            "LIN" => {
                set.lin.push(fields);
                set.known += 1;
            }
            "PRT" => {
                set.prt.push(fields);
                set.known += 1;
            }
            "LAB" => {
                set.lab.push(fields);
                set.known += 1;
            }
            "MTL" => {
                set.mtl.push(fields);
                set.known += 1;
            }
            "TOT" => {
                set.tot.push(fields);
                set.known += 1;
            }
            "" => continue,
            _ => session.record_unknown_fields(tag, fields),
        }
    }

    if set.known == 0 {
        return Err(ParseError::NoRecognizedRecords);
    }
    Ok(set)
}

/// Positional field accessor; positions count from after the record tag.
fn field(fields: &[String], idx: usize) -> Option<&str> {
    fields.get(idx).map(|f| f.as_str())
}

/// `CST|lastName|firstName|companyName|email|homePhone|workPhone|cellPhone|address1|city|province|postalCode`
fn build_customer(set: &RecordSet) -> Option<CustomerInfo> {
    let cst = set.cst.as_ref()?;
    let last_name = opt_clean(field(cst, 0));
    let first_name = opt_clean(field(cst, 1));
    let company = opt_clean(field(cst, 2));
    let kind = classify_party(first_name, last_name, company)?;

    let phones = PhoneSet {
        home: opt_clean(field(cst, 4)).map(|p| normalize_phone(&p)),
        work: opt_clean(field(cst, 5)).map(|p| normalize_phone(&p)),
        cell: opt_clean(field(cst, 6)).map(|p| normalize_phone(&p)),
        fax: None,
    };
    let address = PostalAddress {
        line1: opt_clean(field(cst, 7)),
        line2: None,
        city: opt_clean(field(cst, 8)),
        province: opt_clean(field(cst, 9)),
        postal_code: opt_clean(field(cst, 10)),
        country: None,
    };
    let gst_payable = kind.is_organization();

    Some(CustomerInfo {
        party: kind,
        email: opt_clean(field(cst, 3)).map(|e| e.to_lowercase()),
        phones,
        address,
        gst_payable,
    })
}

/// `VEH|vin|year|make|model|trim|bodyStyle|color|odometer|licensePlate`
fn build_vehicle(set: &RecordSet) -> Option<VehicleInfo> {
    let veh = set.veh.as_ref()?;
    let vehicle = VehicleInfo {
        vin: opt_clean(field(veh, 0)).map(|v| v.to_uppercase()),
        year: field(veh, 1).and_then(parse_i32),
        make: opt_clean(field(veh, 2)),
        model: opt_clean(field(veh, 3)),
        trim: opt_clean(field(veh, 4)),
        body_style: opt_clean(field(veh, 5)),
        color: opt_clean(field(veh, 6)),
        odometer: field(veh, 7).and_then(parse_i64),
        engine: None,
        transmission: None,
        fuel_type: None,
        license_plate: opt_clean(field(veh, 8)),
    };
    if vehicle.is_vacant() {
        None
    } else {
        Some(vehicle)
    }
}

/// Joins `LIN` rows with their detail records, then appends detail records
/// no row claimed as standalone lines.
fn build_lines(set: &RecordSet) -> Vec<EstimateLine> {
    let mut lines = Vec::new();
    let mut used_prt = vec![false; set.prt.len()];
    let mut used_lab = vec![false; set.lab.len()];
    let mut used_mtl = vec![false; set.mtl.len()];

    for (idx, lin) in set.lin.iter().enumerate() {
        let line_number = field(lin, 0)
            .and_then(parse_u32)
            .unwrap_or((idx + 1) as u32);
        let seed = LineSeed {
            line_number,
            parent_line: None,
            description: opt_clean(field(lin, 2)).unwrap_or_default(),
            taxable: field(lin, 3).map(parse_bool_flag).unwrap_or(false),
            declared_kind: field(lin, 1).map(line_kind_from),
        };

        let part = take_matching(&set.prt, &mut used_prt, line_number).map(part_from_record);
        let labor = take_matching(&set.lab, &mut used_lab, line_number).map(labor_from_record);
        let material = take_matching(&set.mtl, &mut used_mtl, line_number).map(material_from_record);

        push_joined_line(&mut lines, seed, part, labor, material);
    }

    for (i, rec) in set.prt.iter().enumerate() {
        if used_prt[i] {
            continue;
        }
        let seed = LineSeed {
            line_number: field(rec, 0).and_then(parse_u32).unwrap_or(0),
            parent_line: None,
            description: String::new(),
            taxable: false,
            declared_kind: Some(LineKind::Part),
        };
        push_joined_line(&mut lines, seed, Some(part_from_record(rec)), None, None);
    }
    for (i, rec) in set.lab.iter().enumerate() {
        if used_lab[i] {
            continue;
        }
        let seed = LineSeed {
            line_number: field(rec, 0).and_then(parse_u32).unwrap_or(0),
            parent_line: None,
            description: String::new(),
            taxable: false,
            declared_kind: Some(LineKind::Labor),
        };
        push_joined_line(&mut lines, seed, None, Some(labor_from_record(rec)), None);
    }
    for (i, rec) in set.mtl.iter().enumerate() {
        if used_mtl[i] {
            continue;
        }
        let seed = LineSeed {
            line_number: field(rec, 0).and_then(parse_u32).unwrap_or(0),
            parent_line: None,
            // MTL carries its own description
            description: opt_clean(field(rec, 1)).unwrap_or_default(),
            taxable: false,
            declared_kind: Some(LineKind::Material),
        };
        push_joined_line(&mut lines, seed, None, None, Some(material_from_record(rec)));
    }

    lines
}

/// First unclaimed detail record whose leading field matches the line number.
fn take_matching<'a>(
    records: &'a [Vec<String>],
    used: &mut [bool],
    line_number: u32,
) -> Option<&'a [String]> {
    for (i, rec) in records.iter().enumerate() {
        if used[i] {
            continue;
        }
        if field(rec, 0).and_then(parse_u32) == Some(line_number) {
            used[i] = true;
            return Some(rec.as_slice());
        }
    }
    None
}

/// `PRT|lineNumber|partNumber|quantity|unitPrice|partType`
fn part_from_record(rec: &[String]) -> PartInfo {
    PartInfo {
        part_number: opt_clean(field(rec, 1)),
        quantity: field(rec, 2).and_then(parse_decimal).unwrap_or(Decimal::ONE),
        unit_price: field(rec, 3).and_then(parse_decimal).unwrap_or(Decimal::ZERO),
        part_type: opt_clean(field(rec, 4)),
        is_material: false,
    }
}

/// `LAB|lineNumber|laborType|hours|rate`
fn labor_from_record(rec: &[String]) -> LaborInfo {
    LaborInfo {
        labor_type: opt_clean(field(rec, 1)),
        hours: field(rec, 2).and_then(parse_decimal).unwrap_or(Decimal::ZERO),
        rate: field(rec, 3).and_then(parse_decimal).unwrap_or(Decimal::ZERO),
    }
}

/// `MTL|lineNumber|description|price`
fn material_from_record(rec: &[String]) -> OtherChargesInfo {
    OtherChargesInfo {
        charge_type: Some("Materials".to_string()),
        price: field(rec, 2).and_then(parse_decimal).unwrap_or(Decimal::ZERO),
    }
}

/// `EST|roNumber|estimateDate|grossTotal|netTotal`, `TOT|totalType|subType|amount`
fn build_totals(set: &RecordSet) -> EstimateTotals {
    let mut totals = EstimateTotals::default();

    if let Some(est) = &set.est {
        totals.gross = field(est, 2).and_then(parse_decimal);
        totals.net = field(est, 3).and_then(parse_decimal);
    }

    for tot in &set.tot {
        let total_type = field(tot, 0).unwrap_or("").to_ascii_uppercase();
        let sub_type = field(tot, 1).unwrap_or("").to_ascii_uppercase();
        let amount = match field(tot, 2).and_then(parse_decimal) {
            Some(amount) => amount,
            None => continue,
        };
        if total_type.contains("TAX") {
            if sub_type.contains("GST") || sub_type.contains("FEDERAL") {
                totals.gst.get_or_insert(amount);
            } else if sub_type.contains("PST") || sub_type.contains("PROVINCIAL") {
                totals.pst.get_or_insert(amount);
            }
        } else if total_type.contains("TOTAL") {
            if sub_type.starts_with('G') {
                totals.gross.get_or_insert(amount);
            } else if sub_type.starts_with('N') {
                totals.net.get_or_insert(amount);
            }
        }
    }

    totals
}

/// Estimate date from the `EST` record, falling back to the header's
/// created date.
fn build_estimate_date(set: &RecordSet) -> Option<NaiveDate> {
    set.est
        .as_ref()
        .and_then(|est| field(est, 1))
        .and_then(parse_estimate_date)
        .or_else(|| {
            set.hdr
                .as_ref()
                .and_then(|hdr| field(hdr, 2))
                .and_then(parse_estimate_date)
        })
}

/// `CLM|claimNumber|insuranceCompany|policyNumber|deductible`
fn build_insurance(set: &RecordSet) -> InsuranceInfo {
    match &set.clm {
        Some(clm) => InsuranceInfo {
            insurer: opt_clean(field(clm, 1)),
            policy_number: opt_clean(field(clm, 2)),
            deductible: field(clm, 3).and_then(parse_decimal),
        },
        None => InsuranceInfo::default(),
    }
}
