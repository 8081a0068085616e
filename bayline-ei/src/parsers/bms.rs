//! BMS estimate parser
//!
//! BMS is the XML family exported by the major estimating systems. The
//! dialects share CIECA ancestry but disagree on nesting and element names,
//! so every field is read through an ordered fallback chain over the generic
//! tree rather than a per-vendor schema. Elements the extractor does not
//! recognize never fail the parse; their dotted paths are recorded in the
//! payload's `unknown_tags` for operator review.

use super::xmltree::{eq_name, XmlNode};
use super::{
    apply_description_flags, classify_party, line_kind_from, normalize_phone, opt_clean,
    parse_bool_flag, parse_decimal, parse_estimate_date, parse_i32, parse_i64, parse_u32,
    push_joined_line, LineSeed, ParseSession,
};
use crate::error::ParseError;
use crate::model::{
    CustomerInfo, EstimateLine, EstimateTotals, InsuranceInfo, JobIdentities, LaborInfo,
    NormalizedPayload, OtherChargesInfo, PartInfo, PhoneSet, PostalAddress, RepairFlags,
    SourceSystem, VehicleInfo,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

/// Elements the extractor consumes at the request root. Anything else
/// becomes an unknown-tag entry.
const ROOT_ELEMENTS: &[&str] = &[
    "RqUID",
    "DocumentInfo",
    "ApplicationInfo",
    "AdminInfo",
    "ClaimInfo",
    "RepairOrderInfo",
    "EstimateInfo",
    "VehInfo",
    "Vehicle",
    "Customer",
    "DamageLineInfo",
    "TotalsInfo",
    "Totals",
    "RepairInfo",
    "SpecialInstructions",
    "RONumber",
    "ClaimNumber",
    "EstimateDate",
    "InsuranceCompany",
    "PolicyNumber",
    "Deductible",
];

const ADMIN_ELEMENTS: &[&str] = &["Owner", "PolicyHolder", "InsuranceCompany"];

const VEHICLE_ELEMENTS: &[&str] = &[
    "VIN",
    "VINNum",
    "ModelYear",
    "Year",
    "MakeDesc",
    "Make",
    "ModelName",
    "Model",
    "TrimDesc",
    "Trim",
    "BodyStyle",
    "ExteriorColor",
    "Color",
    "OdometerReading",
    "Odometer",
    "EngineDesc",
    "Engine",
    "TransmissionDesc",
    "Transmission",
    "FuelType",
    "LicPlateNum",
    "LicensePlate",
    "PlateProvince",
    "Memo",
    "Remarks",
    "Notes",
];

const LINE_ELEMENTS: &[&str] = &[
    "LineNum",
    "LineNumber",
    "ParentLineNum",
    "LineDesc",
    "Description",
    "LineType",
    "Type",
    "TaxableInd",
    "Taxable",
    "PartInfo",
    "LaborInfo",
    "OtherChargesInfo",
    "LineAmt",
    "Amount",
];

const TOTALS_ELEMENTS: &[&str] = &["TotalInfo", "TaxInfo", "AdjustmentInfo"];

/// Parse one BMS document into the canonical payload.
pub fn parse_bms(xml: &str) -> Result<NormalizedPayload, ParseError> {
    let doc = XmlNode::parse(xml)?;
    let root = resolve_root(&doc)?;
    let mut session = ParseSession::new();

    record_unknown_children(root, ROOT_ELEMENTS, &root.name, &mut session);

    let source_system = detect_source_system(root);
    let customer = extract_customer(root, &mut session);
    let (vehicle, memo_ro) = extract_vehicle(root, &mut session);
    let vin = vehicle.as_ref().and_then(|v| v.vin.clone());
    let identities = extract_identities(root, memo_ro, vin);
    let estimate_date = extract_estimate_date(root);
    let insurance = extract_insurance(root);
    let totals = extract_totals(root, &mut session);
    let lines = extract_lines(root, &mut session);
    let flags = extract_flags(root, &lines);

    debug!(
        source = %source_system,
        root = %root.name,
        lines = lines.len(),
        "parsed BMS estimate"
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

/// Locate the request element: either the document root itself or the body
/// of a CIECA envelope.
fn resolve_root(doc: &XmlNode) -> Result<&XmlNode, ParseError> {
    if eq_name(&doc.name, "VehicleDamageEstimateAddRq") || eq_name(&doc.name, "Estimate") {
        return Ok(doc);
    }
    if let Some(rq) = doc.child("VehicleDamageEstimateAddRq") {
        return Ok(rq);
    }
    Err(ParseError::NoRecognizedRoot)
}

fn detect_source_system(root: &XmlNode) -> SourceSystem {
    root.first_text(&[
        &["DocumentInfo", "ApplicationInfo", "ApplicationName"],
        &["ApplicationInfo", "ApplicationName"],
        &["DocumentInfo", "Application"],
        &["Application"],
    ])
    .map(SourceSystem::from_application_name)
    .unwrap_or(SourceSystem::Unknown)
}

fn record_unknown_children(
    node: &XmlNode,
    known: &[&str],
    prefix: &str,
    session: &mut ParseSession,
) {
    for child in &node.children {
        if !known.iter().any(|k| eq_name(k, &child.name)) {
            session.record_unknown(format!("{}.{}", prefix, child.name));
        }
    }
}

/// Owner first, then policyholder, then the flat `Customer` element.
fn extract_customer(root: &XmlNode, session: &mut ParseSession) -> Option<CustomerInfo> {
    if let Some(admin) = root.child("AdminInfo") {
        record_unknown_children(admin, ADMIN_ELEMENTS, "AdminInfo", session);
    }

    let candidates = [
        root.at(&["AdminInfo", "Owner"]),
        root.at(&["AdminInfo", "PolicyHolder"]),
        root.child("Customer"),
    ];
    candidates
        .into_iter()
        .flatten()
        .map(|role| role.child("Party").unwrap_or(role))
        .find_map(extract_party)
}

fn extract_party(party: &XmlNode) -> Option<CustomerInfo> {
    let first_name = opt_clean(party.first_text(&[
        &["PersonInfo", "PersonName", "FirstName"],
        &["PersonName", "FirstName"],
        &["FirstName"],
    ]));
    let last_name = opt_clean(party.first_text(&[
        &["PersonInfo", "PersonName", "LastName"],
        &["PersonName", "LastName"],
        &["LastName"],
    ]));
    let company = opt_clean(party.first_text(&[&["OrgInfo", "CompanyName"], &["CompanyName"]]));

    // Neither a name nor a company means nothing to merge on
    let kind = classify_party(first_name, last_name, company)?;

    let (phones, email) = extract_communications(party);
    let address = extract_address(party);
    let gst_payable = kind.is_organization();

    Some(CustomerInfo {
        party: kind,
        email,
        phones,
        address,
        gst_payable,
    })
}

/// Phones arrive either as qualified `Communication` records or as flat
/// per-type elements; both feed the same bucketed set.
fn extract_communications(party: &XmlNode) -> (PhoneSet, Option<String>) {
    let mut phones = PhoneSet::default();
    let mut email: Option<String> = None;

    let comms = party.first_at(&[
        &["PersonInfo", "Communications"],
        &["OrgInfo", "Communications"],
        &["Communications"],
    ]);
    if let Some(comms) = comms {
        for comm in comms.children_named("Communication") {
            let qualifier = comm
                .first_text(&[&["CommQualifier"], &["Qualifier"], &["Type"]])
                .unwrap_or("");
            if let Some(number) =
                opt_clean(comm.first_text(&[&["CommPhone"], &["Phone"], &["Number"]]))
            {
                bucket_phone(&mut phones, qualifier, &number);
            }
            if let Some(addr) =
                opt_clean(comm.first_text(&[&["CommEmailAddr"], &["Email"], &["EmailAddr"]]))
            {
                email.get_or_insert(addr.to_lowercase());
            }
        }
    }

    if phones.home.is_none() {
        phones.home =
            opt_clean(party.first_text(&[&["HomePhone"], &["Phone"]])).map(|p| normalize_phone(&p));
    }
    if phones.work.is_none() {
        phones.work = opt_clean(party.first_text(&[&["WorkPhone"], &["BusinessPhone"]]))
            .map(|p| normalize_phone(&p));
    }
    if phones.cell.is_none() {
        phones.cell = opt_clean(party.first_text(&[&["CellPhone"], &["MobilePhone"]]))
            .map(|p| normalize_phone(&p));
    }
    if phones.fax.is_none() {
        phones.fax =
            opt_clean(party.first_text(&[&["Fax"], &["FaxPhone"]])).map(|p| normalize_phone(&p));
    }
    if email.is_none() {
        email = opt_clean(party.first_text(&[&["Email"], &["EmailAddress"]]))
            .map(|e| e.to_lowercase());
    }

    (phones, email)
}

fn bucket_phone(phones: &mut PhoneSet, qualifier: &str, number: &str) {
    let value = normalize_phone(number);
    let slot = match qualifier.trim().to_ascii_uppercase().as_str() {
        "HP" | "H" | "HOME" => &mut phones.home,
        "WP" | "W" | "WORK" | "B" | "BUSINESS" => &mut phones.work,
        "CP" | "C" | "CELL" | "M" | "MOBILE" => &mut phones.cell,
        "FX" | "F" | "FAX" => &mut phones.fax,
        // Unqualified numbers land in the first open bucket
        _ => {
            if phones.home.is_none() {
                &mut phones.home
            } else {
                &mut phones.cell
            }
        }
    };
    if slot.is_none() {
        *slot = Some(value);
    }
}

fn extract_address(party: &XmlNode) -> PostalAddress {
    let node = party
        .first_at(&[
            &["PersonInfo", "Address"],
            &["OrgInfo", "Address"],
            &["Address"],
            &["AddressInfo"],
        ])
        .unwrap_or(party);

    PostalAddress {
        line1: opt_clean(node.first_text(&[&["Address1"], &["AddrLine1"], &["Line1"]])),
        line2: opt_clean(node.first_text(&[&["Address2"], &["AddrLine2"], &["Line2"]])),
        city: opt_clean(node.first_text(&[&["City"]])),
        province: opt_clean(node.first_text(&[&["Province"], &["StateProv"], &["State"]])),
        postal_code: opt_clean(node.first_text(&[&["PostalCode"], &["Zip"], &["ZipCode"]])),
        country: opt_clean(node.first_text(&[&["Country"]])),
    }
}

/// Returns the vehicle (when identifiable) and any RO number recovered from
/// its free-text memo.
fn extract_vehicle(
    root: &XmlNode,
    session: &mut ParseSession,
) -> (Option<VehicleInfo>, Option<String>) {
    let node = match root.first_at(&[&["VehInfo"], &["Vehicle"], &["ClaimInfo", "VehInfo"]]) {
        Some(node) => node,
        None => return (None, None),
    };
    record_unknown_children(node, VEHICLE_ELEMENTS, &node.name, session);

    let memo = opt_clean(node.first_text(&[&["Memo"], &["Remarks"], &["Notes"]]));
    let memo_ro = memo.as_deref().and_then(ro_from_memo);

    let vehicle = VehicleInfo {
        vin: opt_clean(node.first_text(&[&["VIN", "VINNum"], &["VIN"], &["VINNum"]]))
            .map(|v| v.to_uppercase()),
        year: node
            .first_text(&[&["ModelYear"], &["Year"]])
            .and_then(parse_i32),
        make: opt_clean(node.first_text(&[&["MakeDesc"], &["Make"]])),
        model: opt_clean(node.first_text(&[&["ModelName"], &["Model"]])),
        trim: opt_clean(node.first_text(&[&["TrimDesc"], &["Trim"]])),
        body_style: opt_clean(node.first_text(&[&["BodyStyle"]])),
        color: opt_clean(node.first_text(&[&["ExteriorColor"], &["Color"]])),
        odometer: node
            .first_text(&[&["OdometerReading"], &["Odometer"]])
            .and_then(parse_i64),
        engine: opt_clean(node.first_text(&[&["EngineDesc"], &["Engine"]])),
        transmission: opt_clean(node.first_text(&[&["TransmissionDesc"], &["Transmission"]])),
        fuel_type: opt_clean(node.first_text(&[&["FuelType"]])),
        license_plate: opt_clean(node.first_text(&[&["LicPlateNum"], &["LicensePlate"]])),
    };

    if vehicle.is_vacant() {
        (None, memo_ro)
    } else {
        (Some(vehicle), memo_ro)
    }
}

/// Pull an RO number out of memo text. Accepts `RO: 4521` and `RO# 4521`
/// style markers; a bare `RO` inside another word is ignored.
fn ro_from_memo(memo: &str) -> Option<String> {
    let upper = memo.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut search = 0;

    while let Some(found) = upper[search..].find("RO") {
        let start = search + found;
        search = start + 2;
        if start > 0 && bytes[start - 1].is_ascii_alphanumeric() {
            continue;
        }
        let mut idx = start + 2;
        while idx < bytes.len() && bytes[idx] == b' ' {
            idx += 1;
        }
        if idx >= bytes.len() || (bytes[idx] != b':' && bytes[idx] != b'#') {
            continue;
        }
        idx += 1;
        while idx < bytes.len() && bytes[idx] == b' ' {
            idx += 1;
        }
        let token_start = idx;
        while idx < bytes.len() && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == b'-') {
            idx += 1;
        }
        if idx > token_start {
            return Some(memo[token_start..idx].to_string());
        }
    }
    None
}

fn extract_identities(
    root: &XmlNode,
    memo_ro: Option<String>,
    vin: Option<String>,
) -> JobIdentities {
    let ro_number = opt_clean(root.first_text(&[
        &["RqUID"],
        &["RepairOrderInfo", "RONum"],
        &["DocumentInfo", "ReferenceNum"],
        &["RONumber"],
    ]))
    .or(memo_ro);

    let claim_number = opt_clean(root.first_text(&[
        &["ClaimInfo", "ClaimNum"],
        &["DocumentInfo", "ClaimNum"],
        &["ClaimNumber"],
    ]));

    JobIdentities {
        ro_number,
        claim_number,
        vin,
    }
}

fn extract_estimate_date(root: &XmlNode) -> Option<NaiveDate> {
    root.first_text(&[
        &["DocumentInfo", "CreateDate"],
        &["EstimateInfo", "EstimateDate"],
        &["EstimateDate"],
    ])
    .and_then(parse_estimate_date)
}

fn extract_insurance(root: &XmlNode) -> InsuranceInfo {
    InsuranceInfo {
        insurer: opt_clean(root.first_text(&[
            &["ClaimInfo", "InsuranceCompany"],
            &["AdminInfo", "InsuranceCompany", "Party", "OrgInfo", "CompanyName"],
            &["InsuranceCompany"],
        ])),
        policy_number: opt_clean(
            root.first_text(&[&["ClaimInfo", "PolicyNum"], &["PolicyNumber"]]),
        ),
        deductible: root
            .first_text(&[&["ClaimInfo", "Deductible"], &["Deductible"]])
            .and_then(parse_decimal),
    }
}

/// Vendor totals are captured verbatim. Grand totals keep net and gross
/// separately; tax rows are classified by description keywords.
fn extract_totals(root: &XmlNode, session: &mut ParseSession) -> EstimateTotals {
    let mut totals = EstimateTotals::default();
    let node = match root.first_at(&[
        &["TotalsInfo"],
        &["Totals"],
        &["EstimateInfo", "TotalsInfo"],
    ]) {
        Some(node) => node,
        None => return totals,
    };
    record_unknown_children(node, TOTALS_ELEMENTS, &node.name, session);

    for total in node.children_named("TotalInfo") {
        let total_type = total
            .first_text(&[&["TotalType"], &["Type"]])
            .unwrap_or("")
            .to_ascii_uppercase();
        let sub_type = total
            .first_text(&[&["TotalSubType"], &["SubType"]])
            .unwrap_or("")
            .to_ascii_uppercase();
        let amount = match total
            .first_text(&[&["TotalAmt"], &["Amount"]])
            .and_then(parse_decimal)
        {
            Some(amount) => amount,
            None => continue,
        };
        if total_type.contains("TOTAL") {
            if sub_type.starts_with('G') && totals.gross.is_none() {
                totals.gross = Some(amount);
            } else if sub_type.starts_with('N') && totals.net.is_none() {
                totals.net = Some(amount);
            }
        }
    }

    for adj in node
        .children
        .iter()
        .filter(|c| eq_name(&c.name, "TaxInfo") || eq_name(&c.name, "AdjustmentInfo"))
    {
        let desc = adj
            .first_text(&[&["TaxDesc"], &["AdjustmentDesc"], &["Description"]])
            .unwrap_or("")
            .to_ascii_uppercase();
        let amount = adj
            .first_text(&[&["TaxAmt"], &["AdjustmentAmt"], &["Amount"]])
            .and_then(parse_decimal);
        if let Some(amount) = amount {
            if desc.contains("GST") || desc.contains("FEDERAL") {
                totals.gst.get_or_insert(amount);
            } else if desc.contains("PST") || desc.contains("PROVINCIAL") {
                totals.pst.get_or_insert(amount);
            }
        }
    }

    totals
}

fn extract_lines(root: &XmlNode, session: &mut ParseSession) -> Vec<EstimateLine> {
    let mut lines = Vec::new();
    let line_parent = root
        .child("EstimateInfo")
        .filter(|e| e.child("DamageLineInfo").is_some())
        .unwrap_or(root);

    for (idx, node) in line_parent.children_named("DamageLineInfo").enumerate() {
        record_unknown_children(node, LINE_ELEMENTS, "DamageLineInfo", session);

        let seed = LineSeed {
            line_number: node
                .first_text(&[&["LineNum"], &["LineNumber"]])
                .and_then(parse_u32)
                .unwrap_or((idx + 1) as u32),
            parent_line: node.text_at(&["ParentLineNum"]).and_then(parse_u32),
            description: opt_clean(node.first_text(&[&["LineDesc"], &["Description"]]))
                .unwrap_or_default(),
            taxable: node
                .first_text(&[&["TaxableInd"], &["Taxable"]])
                .map(parse_bool_flag)
                .unwrap_or(false),
            declared_kind: node
                .first_text(&[&["LineType"], &["Type"]])
                .map(line_kind_from),
        };

        let part = node.child("PartInfo").map(|p| PartInfo {
            part_number: opt_clean(p.first_text(&[
                &["PartNum"],
                &["PartNumber"],
                &["OEMPartNum"],
            ])),
            quantity: p
                .first_text(&[&["Quantity"], &["Qty"]])
                .and_then(parse_decimal)
                .unwrap_or(Decimal::ONE),
            unit_price: p
                .first_text(&[&["PartPrice"], &["UnitPrice"], &["Price"]])
                .and_then(parse_decimal)
                .unwrap_or(Decimal::ZERO),
            part_type: opt_clean(p.text_at(&["PartType"])),
            is_material: false,
        });

        let labor = node.child("LaborInfo").map(|l| LaborInfo {
            labor_type: opt_clean(l.first_text(&[&["LaborType"], &["Type"]])),
            hours: l
                .first_text(&[&["LaborHours"], &["Hours"]])
                .and_then(parse_decimal)
                .unwrap_or(Decimal::ZERO),
            rate: l
                .first_text(&[&["LaborRate"], &["Rate"]])
                .and_then(parse_decimal)
                .unwrap_or(Decimal::ZERO),
        });

        let other = node.child("OtherChargesInfo").map(|o| OtherChargesInfo {
            charge_type: opt_clean(o.first_text(&[&["ChargeType"], &["Type"]])),
            price: o
                .first_text(&[&["Price"], &["Amount"]])
                .and_then(parse_decimal)
                .unwrap_or(Decimal::ZERO),
        });

        push_joined_line(&mut lines, seed, part, labor, other);
    }
    lines
}

/// Explicit repair indicators when the export carries them, keyword scan
/// over line descriptions otherwise.
fn extract_flags(root: &XmlNode, lines: &[EstimateLine]) -> RepairFlags {
    let mut flags = RepairFlags::default();

    if let Some(node) = root.first_at(&[&["RepairInfo"], &["SpecialInstructions"]]) {
        flags.adas_calibration = node
            .first_text(&[&["ADASCalibration"], &["AdasCalibration"]])
            .map(parse_bool_flag)
            .unwrap_or(false);
        flags.post_repair_scan = node
            .first_text(&[&["PostRepairScan"], &["PostScan"]])
            .map(parse_bool_flag)
            .unwrap_or(false);
        flags.wheel_alignment = node
            .first_text(&[&["FourWheelAlignment"], &["Alignment"]])
            .map(parse_bool_flag)
            .unwrap_or(false);
    }

    for line in lines {
        apply_description_flags(&mut flags, &line.description);
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CustomerParty, LineKind};

    const MITCHELL_ENVELOPE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CIECA xmlns="http://www.cieca.com/BMS">
  <VehicleDamageEstimateAddRq>
    <RqUID>EST-2024-00017</RqUID>
    <DocumentInfo>
      <ApplicationInfo><ApplicationName>Mitchell Estimating</ApplicationName></ApplicationInfo>
      <CreateDate>2024-08-15</CreateDate>
      <ClaimNum>N/A</ClaimNum>
    </DocumentInfo>
    <AdminInfo>
      <PolicyHolder>
        <Party>
          <PersonInfo>
            <PersonName><FirstName>Dana</FirstName><LastName>Whitfield</LastName></PersonName>
            <Communications>
              <Communication><CommQualifier>HP</CommQualifier><CommPhone>604 555 1234</CommPhone></Communication>
              <Communication><CommQualifier>CP</CommQualifier><CommPhone>(604) 555-9876</CommPhone></Communication>
              <Communication><CommQualifier>EM</CommQualifier><CommEmailAddr>Dana.Whitfield@Example.com</CommEmailAddr></Communication>
            </Communications>
            <Address>
              <Address1>12 Carrall St</Address1>
              <City>Vancouver</City>
              <StateProv>BC</StateProv>
              <PostalCode>V6B 2J1</PostalCode>
            </Address>
          </PersonInfo>
        </Party>
      </PolicyHolder>
    </AdminInfo>
    <ClaimInfo>
      <ClaimNum>ICBC-2024-88112</ClaimNum>
      <InsuranceCompany>ICBC</InsuranceCompany>
      <PolicyNum>POL-5521</PolicyNum>
      <Deductible>300.00</Deductible>
    </ClaimInfo>
    <VehInfo>
      <VIN><VINNum>2t1burhe5jc055217</VINNum></VIN>
      <ModelYear>2018</ModelYear>
      <MakeDesc>Toyota</MakeDesc>
      <ModelName>Corolla</ModelName>
      <ExteriorColor>Silver</ExteriorColor>
      <OdometerReading>88,412</OdometerReading>
      <Memo>Drop-off Tuesday. RO: 4521</Memo>
    </VehInfo>
    <DamageLineInfo>
      <LineNum>1</LineNum>
      <LineDesc>Front bumper cover</LineDesc>
      <LineType>Part</LineType>
      <TaxableInd>Y</TaxableInd>
      <PartInfo><PartNum>52119-02180</PartNum><Quantity>1</Quantity><PartPrice>450.00</PartPrice></PartInfo>
      <LaborInfo><LaborType>Body</LaborType><LaborHours>2.5</LaborHours><LaborRate>65.00</LaborRate></LaborInfo>
    </DamageLineInfo>
    <DamageLineInfo>
      <LineNum>2</LineNum>
      <LineDesc>Paint supplies</LineDesc>
      <LineType>Material</LineType>
      <TaxableInd>Y</TaxableInd>
      <OtherChargesInfo><ChargeType>Paint Materials</ChargeType><Price>27.35</Price></OtherChargesInfo>
    </DamageLineInfo>
    <TotalsInfo>
      <TotalInfo><TotalType>RepairTotal</TotalType><TotalSubType>Gross</TotalSubType><TotalAmt>705.00</TotalAmt></TotalInfo>
      <TotalInfo><TotalType>RepairTotal</TotalType><TotalSubType>Net</TotalSubType><TotalAmt>655.00</TotalAmt></TotalInfo>
      <TaxInfo><TaxDesc>GST 5%</TaxDesc><TaxAmt>31.99</TaxAmt></TaxInfo>
      <TaxInfo><TaxDesc>Provincial Sales Tax</TaxDesc><TaxAmt>44.79</TaxAmt></TaxInfo>
    </TotalsInfo>
    <TelematicsExtension><Blob>opaque</Blob></TelematicsExtension>
  </VehicleDamageEstimateAddRq>
</CIECA>"#;

    #[test]
    fn cieca_envelope_extracts_all_sections() {
        let payload = parse_bms(MITCHELL_ENVELOPE).unwrap();

        assert_eq!(payload.identities.ro_number.as_deref(), Some("EST-2024-00017"));
        assert_eq!(
            payload.identities.claim_number.as_deref(),
            Some("ICBC-2024-88112")
        );
        assert_eq!(
            payload.identities.vin.as_deref(),
            Some("2T1BURHE5JC055217")
        );

        let customer = payload.customer.as_ref().unwrap();
        assert_eq!(
            customer.party,
            CustomerParty::Person {
                first_name: "Dana".into(),
                last_name: "Whitfield".into(),
            }
        );
        assert_eq!(customer.email.as_deref(), Some("dana.whitfield@example.com"));
        assert_eq!(customer.phones.home.as_deref(), Some("(604) 555-1234"));
        assert_eq!(customer.phones.cell.as_deref(), Some("(604) 555-9876"));
        assert_eq!(customer.address.city.as_deref(), Some("Vancouver"));
        assert_eq!(customer.address.province.as_deref(), Some("BC"));
        assert!(!customer.gst_payable);

        let vehicle = payload.vehicle.as_ref().unwrap();
        assert_eq!(vehicle.year, Some(2018));
        assert_eq!(vehicle.make.as_deref(), Some("Toyota"));
        assert_eq!(vehicle.odometer, Some(88412));

        assert_eq!(
            payload.estimate_date,
            NaiveDate::from_ymd_opt(2024, 8, 15)
        );

        assert_eq!(payload.insurance.insurer.as_deref(), Some("ICBC"));
        assert_eq!(payload.insurance.policy_number.as_deref(), Some("POL-5521"));
        assert_eq!(payload.insurance.deductible, Some(Decimal::new(30000, 2)));

        assert_eq!(payload.totals.gross, Some(Decimal::new(70500, 2)));
        assert_eq!(payload.totals.net, Some(Decimal::new(65500, 2)));
        assert_eq!(payload.totals.gst, Some(Decimal::new(3199, 2)));
        assert_eq!(payload.totals.pst, Some(Decimal::new(4479, 2)));
        assert_eq!(payload.totals.vendor_total(), Some(Decimal::new(65500, 2)));

        assert_eq!(payload.lines.len(), 3);
        assert_eq!(payload.lines[0].kind, LineKind::Part);
        assert_eq!(payload.lines[0].amount, Decimal::new(45000, 2));
        assert_eq!(payload.lines[1].kind, LineKind::Labor);
        assert_eq!(payload.lines[1].parent_line, Some(1));
        assert_eq!(payload.lines[1].amount, Decimal::new(16250, 2));
        assert_eq!(payload.lines[2].kind, LineKind::Material);
        assert!(payload.lines[2].part().unwrap().is_material);

        assert_eq!(payload.meta.source_system, SourceSystem::Mitchell);
        assert!(payload
            .meta
            .unknown_tags
            .iter()
            .any(|t| t == "VehicleDamageEstimateAddRq.TelematicsExtension"));
    }

    #[test]
    fn simplified_estimate_root_with_company_customer() {
        let xml = r#"
<Estimate>
  <RONumber>RO-7788</RONumber>
  <ClaimNumber>N/A</ClaimNumber>
  <EstimateDate>20240231</EstimateDate>
  <Customer>
    <CompanyName>Coastal Fleet Services Ltd</CompanyName>
    <FirstName>Priya</FirstName>
    <LastName>Nair</LastName>
    <Email>FLEET@COASTAL.CA</Email>
    <Phone>2505550000</Phone>
  </Customer>
  <Vehicle>
    <VIN>1FTFW1ET5DFC10312</VIN>
    <Year>2013</Year>
    <Make>Ford</Make>
    <Model>F-150</Model>
  </Vehicle>
  <DamageLineInfo>
    <LineNum>1</LineNum>
    <LineDesc>Post repair diagnostic scan</LineDesc>
    <LineType>Sublet</LineType>
    <OtherChargesInfo><ChargeType>Sublet</ChargeType><Price>149.99</Price></OtherChargesInfo>
  </DamageLineInfo>
</Estimate>"#;
        let payload = parse_bms(xml).unwrap();

        assert_eq!(payload.identities.ro_number.as_deref(), Some("RO-7788"));
        // N/A sentinel means absent, not a literal claim number
        assert_eq!(payload.identities.claim_number, None);
        // 2024-02-31 does not exist
        assert_eq!(payload.estimate_date, None);

        let customer = payload.customer.as_ref().unwrap();
        assert_eq!(
            customer.party,
            CustomerParty::Organization {
                company_name: "Coastal Fleet Services Ltd".into(),
                contact_name: Some("Priya Nair".into()),
            }
        );
        assert!(customer.gst_payable);
        assert_eq!(customer.email.as_deref(), Some("fleet@coastal.ca"));
        assert_eq!(customer.phones.home.as_deref(), Some("(250) 555-0000"));

        assert_eq!(payload.lines.len(), 1);
        assert_eq!(payload.lines[0].kind, LineKind::Sublet);
        assert_eq!(payload.lines[0].amount, Decimal::new(14999, 2));
        assert!(payload.flags.post_repair_scan);

        assert_eq!(payload.meta.source_system, SourceSystem::Unknown);
        assert!(payload.meta.unknown_tags.is_empty());
    }

    #[test]
    fn owner_outranks_policyholder() {
        let xml = r#"
<VehicleDamageEstimateAddRq>
  <RONumber>77</RONumber>
  <AdminInfo>
    <Owner><Party><PersonInfo><PersonName><FirstName>Mara</FirstName><LastName>Holt</LastName></PersonName></PersonInfo></Party></Owner>
    <PolicyHolder><Party><PersonInfo><PersonName><FirstName>Sam</FirstName><LastName>Pruitt</LastName></PersonName></PersonInfo></Party></PolicyHolder>
  </AdminInfo>
</VehicleDamageEstimateAddRq>"#;
        let payload = parse_bms(xml).unwrap();

        assert_eq!(payload.identities.ro_number.as_deref(), Some("77"));
        assert_eq!(
            payload.customer.unwrap().party,
            CustomerParty::Person {
                first_name: "Mara".into(),
                last_name: "Holt".into(),
            }
        );
    }

    #[test]
    fn memo_ro_marker_is_last_resort() {
        let xml = r#"
<VehicleDamageEstimateAddRq>
  <VehInfo>
    <VIN>1HGCM82633A004352</VIN>
    <Memo>customer waiting, RO# 8912, call first</Memo>
  </VehInfo>
  <RepairInfo>
    <ADASCalibration>Y</ADASCalibration>
    <PostRepairScan>N</PostRepairScan>
  </RepairInfo>
</VehicleDamageEstimateAddRq>"#;
        let payload = parse_bms(xml).unwrap();

        assert_eq!(payload.identities.ro_number.as_deref(), Some("8912"));
        assert_eq!(payload.identities.vin.as_deref(), Some("1HGCM82633A004352"));
        assert!(payload.flags.adas_calibration);
        assert!(!payload.flags.post_repair_scan);
        assert!(!payload.flags.wheel_alignment);
    }

    #[test]
    fn memo_ro_ignores_embedded_ro_words() {
        assert_eq!(ro_from_memo("approved by pro shop"), None);
        assert_eq!(ro_from_memo("RO 4521 without separator"), None);
        assert_eq!(ro_from_memo("see RO:4521 today"), Some("4521".to_string()));
        assert_eq!(ro_from_memo("RO # 77-A"), Some("77-A".to_string()));
    }

    #[test]
    fn gross_only_totals_fall_back_and_taxes_classify_by_keyword() {
        let xml = r#"
<Estimate>
  <RONumber>551</RONumber>
  <TotalsInfo>
    <TotalInfo><TotalType>Total</TotalType><TotalSubType>Gross</TotalSubType><TotalAmt>1,234.56</TotalAmt></TotalInfo>
    <TaxInfo><TaxDesc>Federal Tax</TaxDesc><TaxAmt>61.73</TaxAmt></TaxInfo>
    <Rounding>0.01</Rounding>
  </TotalsInfo>
</Estimate>"#;
        let payload = parse_bms(xml).unwrap();

        assert_eq!(payload.totals.gross, Some(Decimal::new(123456, 2)));
        assert_eq!(payload.totals.net, None);
        assert_eq!(payload.totals.vendor_total(), Some(Decimal::new(123456, 2)));
        assert_eq!(payload.totals.gst, Some(Decimal::new(6173, 2)));
        assert_eq!(payload.totals.pst, None);
        assert!(payload
            .meta
            .unknown_tags
            .iter()
            .any(|t| t == "TotalsInfo.Rounding"));
    }

    #[test]
    fn unrecognized_root_is_rejected() {
        let err = parse_bms("<Inventory><Item/></Inventory>").unwrap_err();
        assert!(matches!(err, ParseError::NoRecognizedRoot));
    }

    #[test]
    fn malformed_xml_is_rejected() {
        assert!(parse_bms("<Estimate><RONumber>9").is_err());
        assert!(parse_bms("<Estimate><A></B></Estimate>").is_err());
    }
}
