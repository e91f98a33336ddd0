//! Mapping between the local single-payload report shape and the column
//! layouts of the remote report resources.

use fieldsync_core::Row;
use serde_json::{Map, Value};

use super::store::{Asset, Job, JobAsset, Report};

pub type Payload = Map<String, Value>;

pub const FORM_INSTANCE_RESOURCE: &str = "custom_form_instances";
pub const FORM_INSTANCE_SLUG: &str = "custom_form";
const FORM_INSTANCE_TITLE: &str = "Custom Form";
const FORM_DEFAULT_STATUS: &str = "PASS";
const FORM_METADATA: &[&str] = &["template_id", "template_name", "neta_section", "status"];

/// Row columns that identify a record rather than carry report content.
const IDENTITY_COLUMNS: &[&str] = &["id", "job_id", "user_id", "created_at", "updated_at"];

/// False for null and for empty strings, arrays and objects.
pub fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Reads a JSON object that may have been stored as (possibly doubly)
/// encoded text.
pub fn as_object(value: &Value) -> Option<Payload> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|decoded| as_object(&decoded)),
        _ => None,
    }
}

// ---- inbound ----

/// One way of locating a concept inside a remote row.
#[derive(Debug, Clone, Copy)]
enum Probe {
    /// Value at a nested key path.
    At(&'static [&'static str]),
    /// An array stored directly under the key or under its `items` field.
    ItemsOf(&'static str),
}

struct Concept {
    target: &'static str,
    probes: &'static [Probe],
}

/// Historical aliases per concept, most specific first. Adding an alias is a
/// data change only.
const CONCEPTS: &[Concept] = &[
    Concept {
        target: "visualInspectionItems",
        probes: &[
            Probe::At(&["visual_mechanical", "items"]),
            Probe::At(&["visual_inspection", "items"]),
            Probe::ItemsOf("visual_inspection_items"),
            Probe::At(&["visualMechanical", "items"]),
        ],
    },
    Concept {
        target: "insulationResistanceTests",
        probes: &[Probe::At(&["insulation_resistance", "tests"])],
    },
    Concept {
        target: "insulationResistance",
        probes: &[
            Probe::At(&["data", "insulationResistance"]),
            Probe::At(&["insulation_resistance"]),
        ],
    },
    Concept {
        target: "contactResistanceTests",
        probes: &[Probe::At(&["contact_resistance", "tests"])],
    },
    Concept {
        target: "contactResistance",
        probes: &[
            Probe::At(&["data", "contactResistance"]),
            Probe::At(&["contact_resistance"]),
        ],
    },
    Concept {
        target: "testEquipment",
        probes: &[
            Probe::At(&["test_equipment_used"]),
            Probe::At(&["test_equipment"]),
            Probe::At(&["report_info", "testEquipment"]),
        ],
    },
    Concept {
        target: "nameplateData",
        probes: &[
            Probe::At(&["data", "nameplateData"]),
            Probe::At(&["nameplate_data"]),
            Probe::At(&["nameplate"]),
        ],
    },
    Concept {
        target: "primaryInjection",
        probes: &[Probe::At(&["primary_injection"])],
    },
    Concept {
        target: "deviceSettings",
        probes: &[Probe::At(&["device_settings"])],
    },
    Concept {
        target: "correctedInsulationResistance",
        probes: &[Probe::At(&["insulation_resistance", "correctedReadings"])],
    },
    Concept {
        target: "testVoltage",
        probes: &[Probe::At(&["insulation_resistance", "testVoltage"])],
    },
    Concept {
        target: "tcf",
        probes: &[Probe::At(&["insulation_resistance", "tcf"])],
    },
    Concept {
        target: "busResistance",
        probes: &[Probe::At(&["bus_resistance"])],
    },
];

impl Probe {
    fn read<'a>(&self, row: &'a Payload) -> Option<&'a Value> {
        let found = match self {
            Probe::At(path) => {
                let (first, rest) = path.split_first()?;
                rest.iter()
                    .try_fold(row.get(*first)?, |value, key| value.get(*key))?
            }
            Probe::ItemsOf(key) => {
                let value = row.get(*key)?;
                if value.is_array() {
                    value
                } else {
                    value.get("items").filter(|items| items.is_array())?
                }
            }
        };
        has_content(found).then_some(found)
    }
}

/// A remote report row mapped into the local report shape.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundReport {
    pub id: String,
    pub job_id: Option<String>,
    pub user_id: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub title: Option<String>,
    pub slug: String,
    pub payload: Payload,
}

/// Maps a row fetched from a type-routed resource. The slug comes from the
/// locator that led to the row; rows carry no discriminator of their own.
pub fn from_remote(row: &Row, slug: &str) -> Option<InboundReport> {
    let id = text(row, "id")?;
    let row = decode_json_columns(row);

    let mut payload = Payload::new();
    for (key, value) in &row {
        if !IDENTITY_COLUMNS.contains(&key.as_str()) {
            payload.insert(key.clone(), value.clone());
        }
    }
    for section in ["report_info", "report_data"] {
        if let Some(Value::Object(fields)) = row.get(section) {
            merge_missing(&mut payload, fields);
        }
    }
    for concept in CONCEPTS {
        if payload.contains_key(concept.target) {
            continue;
        }
        if let Some(value) = concept.probes.iter().find_map(|probe| probe.read(&row)) {
            payload.insert(concept.target.to_string(), value.clone());
        }
    }
    if let Some(Value::Object(fields)) = row.get("data") {
        merge_missing(&mut payload, fields);
    }

    Some(InboundReport {
        id,
        job_id: text(&row, "job_id"),
        user_id: text(&row, "user_id"),
        created_at: text(&row, "created_at"),
        updated_at: text(&row, "updated_at"),
        title: None,
        slug: slug.to_string(),
        payload,
    })
}

/// Maps a `custom_form_instances` row, folding the template metadata into the
/// payload so the report can be routed back on upload.
pub fn form_instance_payload(row: &Row) -> Option<InboundReport> {
    let id = text(row, "id")?;
    let mut payload = row.get("data").and_then(as_object).unwrap_or_default();

    let template_name = text(row, "template_name");
    let neta_section = text(row, "neta_section");
    payload.insert(
        "template_id".into(),
        row.get("template_id").cloned().unwrap_or(Value::Null),
    );
    payload.insert(
        "template_name".into(),
        Value::String(
            template_name
                .clone()
                .unwrap_or_else(|| FORM_INSTANCE_TITLE.to_string()),
        ),
    );
    payload.insert(
        "neta_section".into(),
        neta_section.clone().map(Value::String).unwrap_or(Value::Null),
    );
    payload.insert(
        "status".into(),
        Value::String(text(row, "status").unwrap_or_else(|| FORM_DEFAULT_STATUS.to_string())),
    );

    Some(InboundReport {
        id,
        job_id: text(row, "job_id"),
        user_id: text(row, "user_id"),
        created_at: text(row, "created_at"),
        updated_at: text(row, "updated_at"),
        title: Some(template_name.unwrap_or_else(|| FORM_INSTANCE_TITLE.to_string())),
        slug: neta_section.unwrap_or_else(|| FORM_INSTANCE_SLUG.to_string()),
        payload,
    })
}

fn decode_json_columns(row: &Row) -> Row {
    let mut row = row.clone();
    for column in ["report_info", "report_data", "data"] {
        if !matches!(row.get(column), Some(Value::String(_))) {
            continue;
        }
        if let Some(decoded) = row.get(column).and_then(as_object) {
            row.insert(column.to_string(), Value::Object(decoded));
        }
    }
    row
}

fn merge_missing(target: &mut Payload, fields: &Payload) {
    for (key, value) in fields {
        if !target.contains_key(key) {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---- outbound ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Whole payload in a single `report_data` column.
    ReportData,
    /// Whole payload in a single `data` column.
    Data,
    /// One column per report section.
    Sectioned(&'static [&'static str]),
}

const ATS25_TRANSFORMER: &[&str] = &[
    "report_info",
    "visual_mechanical",
    "insulation_resistance",
    "turns_ratio",
    "test_equipment",
    "comments",
];
const ATS25_LIQUID: &[&str] = &[
    "report_info",
    "visual_mechanical",
    "insulation_resistance",
    "test_equipment",
    "comments",
];
const ATS25_ASSEMBLY: &[&str] = &[
    "report_info",
    "visual_mechanical",
    "insulation_resistance",
    "contact_resistance",
    "test_equipment",
    "comments",
];
const POTENTIAL_TRANSFORMER: &[&str] = &[
    "report_info",
    "device_data",
    "visual_inspection",
    "fuse_data",
    "fuse_resistance",
    "insulation_resistance",
    "insulation_corrected",
    "turns_ratio",
    "equipment_used",
    "comments",
];
const DEVICE_TESTS: &[&str] = &[
    "report_info",
    "device_data",
    "visual_inspection",
    "electrical_tests",
    "test_equipment",
    "comments",
];
const HEADER_ONLY: &[&str] = &["report_info"];
const GROUNDING: &[&str] = &["report_info", "rows"];
const BUSWAY: &[&str] = &[
    "report_info",
    "visual_inspection",
    "insulation_resistance",
    "contact_resistance",
    "test_equipment",
    "comments",
];
const TRANSFER_SWITCH: &[&str] = &[
    "report_info",
    "visual_inspection_items",
    "insulation_resistance",
    "contact_resistance",
    "test_equipment_used",
    "comments",
];
const SMALL_BREAKER_PANEL: &[&str] = &[
    "report_info",
    "visual_mechanical_inspection",
    "electrical_tests",
    "test_equipment",
    "comments_text",
    "status",
];

pub fn layout_for(resource: &str) -> Layout {
    match resource {
        "medium_voltage_circuit_breaker_reports"
        | "medium_voltage_circuit_breaker_mts_reports"
        | "liquid_xfmr_visual_mts_reports"
        | "two_small_dry_type_xfmr_ats_reports"
        | "two_small_dry_type_xfmr_mts_reports"
        | "current_transformer_test_mts_reports"
        | "voltage_potential_transformer_mts_reports"
        | "low_voltage_cable_test_3sets"
        | "low_voltage_cable_test_12sets" => Layout::ReportData,
        "medium_voltage_cable_vlf_test"
        | "medium_voltage_vlf_mts_reports"
        | "tandelta_reports"
        | "tandelta_mts_reports" => Layout::Data,
        "small_lv_dry_type_transformer_ats25_reports" => Layout::Sectioned(ATS25_TRANSFORMER),
        "liquid_filled_xfmr_ats25_reports" => Layout::Sectioned(ATS25_LIQUID),
        "switchgear_switchboard_ats25_reports" | "panelboard_assemblies_ats25_reports" => {
            Layout::Sectioned(ATS25_ASSEMBLY)
        }
        "potential_transformer_ats_reports" => Layout::Sectioned(POTENTIAL_TRANSFORMER),
        "current_transformer_test_ats_reports"
        | "low_voltage_circuit_breaker_electronic_trip_ats"
        | "low_voltage_circuit_breaker_electronic_trip_mts"
        | "low_voltage_circuit_breaker_thermal_magnetic_ats"
        | "low_voltage_circuit_breaker_thermal_magnetic_mts_reports" => {
            Layout::Sectioned(DEVICE_TESTS)
        }
        "grounding_system_master_reports"
        | "grounding_fall_of_potential_slope_method_test_reports" => Layout::Sectioned(GROUNDING),
        "metal_enclosed_busway_reports" => Layout::Sectioned(BUSWAY),
        "automatic_transfer_switch_ats_reports" => Layout::Sectioned(TRANSFER_SWITCH),
        "low_voltage_panelboard_small_breaker_reports" => Layout::Sectioned(SMALL_BREAKER_PANEL),
        _ => Layout::Sectioned(HEADER_ONLY),
    }
}

/// Payload keys that may fill a sectioned column, in order of preference.
fn column_candidates(column: &'static str) -> Vec<&'static str> {
    let aliases: &[&'static str] = match column {
        "visual_mechanical"
        | "visual_inspection"
        | "visual_inspection_items"
        | "visual_mechanical_inspection" => &[
            "visualInspectionItems",
            "visual_inspection_items",
            "visualInspection",
        ],
        "insulation_resistance" => &["insulationResistance"],
        "contact_resistance" => &["contactResistance"],
        "turns_ratio" => &["turnsRatio"],
        "test_equipment" => &["test_equipment_used", "testEquipment"],
        "test_equipment_used" => &["test_equipment", "testEquipment"],
        "equipment_used" => &["equipment", "test_equipment_used", "testEquipment"],
        "device_data" => &["ptData", "ctData", "deviceData"],
        "electrical_tests" => &["electricalTests"],
        "fuse_data" => &["fuseData"],
        "fuse_resistance" => &["fuseResistance"],
        "insulation_corrected" => &["insulationCorrected"],
        "comments_text" => &["comments"],
        _ => &[],
    };
    let mut candidates = Vec::with_capacity(aliases.len() + 1);
    candidates.push(column);
    candidates.extend(aliases.iter().copied());
    candidates
}

/// Header fields of a synthesized `report_info`, each with its source keys.
const REPORT_INFO_FIELDS: &[(&str, &[&str])] = &[
    ("customer", &["customerName", "customer"]),
    ("address", &["customerLocation", "address"]),
    ("jobNumber", &["jobNumber"]),
    ("identifier", &["identifier"]),
    ("technicians", &["technicians"]),
    ("date", &["date"]),
    ("substation", &["substation"]),
    ("eqptLocation", &["eqptLocation"]),
    ("temperature", &["temperature"]),
    ("status", &["status"]),
    ("nameplate", &["nameplate", "nameplate_data", "nameplateData"]),
];

fn first_with_content<'a>(payload: &'a Payload, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| payload.get(*key))
        .find(|value| has_content(value))
}

fn report_info(payload: &Payload) -> Option<Value> {
    if let Some(existing) = payload.get("report_info").filter(|v| has_content(v)) {
        return Some(existing.clone());
    }
    let mut info = Payload::new();
    for (field, sources) in REPORT_INFO_FIELDS {
        if let Some(value) = first_with_content(payload, sources) {
            info.insert(field.to_string(), value.clone());
        }
    }
    (!info.is_empty()).then_some(Value::Object(info))
}

/// Builds the remote row for a report headed to `resource`.
pub fn to_remote(report: &Report, resource: &str) -> Row {
    let payload = as_object(&report.data).unwrap_or_default();
    let mut row = identity_row(report);

    match layout_for(resource) {
        Layout::ReportData => {
            row.insert("report_data".into(), Value::Object(payload));
        }
        Layout::Data => {
            row.insert("data".into(), Value::Object(payload));
        }
        Layout::Sectioned(columns) => {
            for column in columns {
                let value = if *column == "report_info" {
                    report_info(&payload)
                } else {
                    first_with_content(&payload, &column_candidates(*column)).cloned()
                };
                if let Some(value) = value {
                    row.insert(column.to_string(), value);
                }
            }
        }
    }
    row
}

/// True when a report payload was downloaded from `custom_form_instances`.
pub fn is_form_instance(report: &Report) -> bool {
    report
        .data
        .get("template_id")
        .is_some_and(|id| has_content(id))
}

pub fn to_form_instance_row(report: &Report) -> Row {
    let mut payload = as_object(&report.data).unwrap_or_default();
    let mut row = identity_row(report);
    for key in FORM_METADATA {
        if let Some(value) = payload.remove(*key) {
            row.insert(key.to_string(), value);
        }
    }
    row.entry("template_name")
        .or_insert_with(|| Value::String(report.title.clone()));
    row.entry("status")
        .or_insert_with(|| Value::String(FORM_DEFAULT_STATUS.into()));
    row.insert("data".into(), Value::Object(payload));
    row
}

fn identity_row(report: &Report) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::String(report.id.clone()));
    row.insert("job_id".into(), Value::String(report.job_id.clone()));
    for (column, value) in [
        ("user_id", &report.submitted_by),
        ("created_at", &report.created_at),
        ("updated_at", &report.updated_at),
    ] {
        if let Some(value) = value {
            row.insert(column.into(), Value::String(value.clone()));
        }
    }
    row
}

/// Columns sent with a PATCH: identity is addressed by the URL, and
/// `updated_at` is the only identity column that moves.
pub fn patch_columns(mut row: Row) -> Row {
    for column in IDENTITY_COLUMNS {
        if *column != "updated_at" {
            row.remove(*column);
        }
    }
    row
}

pub fn job_to_remote(job: &Job) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::String(job.id.clone()));
    row.insert("title".into(), Value::String(job.title.clone()));
    row.insert("status".into(), Value::String(job.status.clone()));
    for (column, value) in [
        ("job_number", &job.job_number),
        ("description", &job.description),
        ("division", &job.division),
        ("location", &job.location),
        ("start_date", &job.start_date),
        ("due_date", &job.due_date),
        ("priority", &job.priority),
        ("customer_id", &job.customer_id),
        ("notes", &job.notes),
        ("updated_at", &job.updated_at),
    ] {
        if let Some(value) = value {
            row.insert(column.into(), Value::String(value.clone()));
        }
    }
    row
}

pub fn asset_to_remote(asset: &Asset) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::String(asset.id.clone()));
    row.insert("name".into(), Value::String(asset.name.clone()));
    for (column, value) in [
        ("file_url", &asset.file_url),
        ("status", &asset.status),
        ("approved_at", &asset.approved_at),
        ("sent_at", &asset.sent_at),
        ("created_at", &asset.created_at),
    ] {
        if let Some(value) = value {
            row.insert(column.into(), Value::String(value.clone()));
        }
    }
    row
}

pub fn job_asset_to_remote(link: &JobAsset) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::String(link.id.clone()));
    row.insert("job_id".into(), Value::String(link.job_id.clone()));
    row.insert("asset_id".into(), Value::String(link.asset_id.clone()));
    if let Some(user_id) = &link.user_id {
        row.insert("user_id".into(), Value::String(user_id.clone()));
    }
    if let Some(created_at) = &link.created_at {
        row.insert("created_at".into(), Value::String(created_at.clone()));
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn report_with(data: Value) -> Report {
        let mut report = Report::draft("R1", "J1", "automatic-transfer-switch-ats-report");
        report.data = data;
        report.submitted_by = Some("tech-7".into());
        report
    }

    #[test]
    fn visual_items_probe_each_historical_alias() {
        for (column, value) in [
            ("visual_mechanical", json!({ "items": [{ "id": "7.1" }] })),
            ("visual_inspection", json!({ "items": [{ "id": "7.1" }] })),
            ("visual_inspection_items", json!([{ "id": "7.1" }])),
            ("visual_inspection_items", json!({ "items": [{ "id": "7.1" }] })),
            ("visualMechanical", json!({ "items": [{ "id": "7.1" }] })),
        ] {
            let mut source = Row::new();
            source.insert("id".into(), json!("R1"));
            source.insert(column.into(), value);
            let inbound = from_remote(&source, "slug-x").unwrap();
            assert_eq!(
                inbound.payload["visualInspectionItems"],
                json!([{ "id": "7.1" }]),
                "{column}"
            );
        }
    }

    #[test]
    fn first_non_empty_candidate_wins() {
        let inbound = from_remote(
            &row(json!({
                "id": "R1",
                "test_equipment_used": {},
                "test_equipment": { "megger": "M-1" }
            })),
            "slug-x",
        )
        .unwrap();
        assert_eq!(inbound.payload["testEquipment"], json!({ "megger": "M-1" }));
    }

    #[test]
    fn unmatched_field_leaves_concept_absent() {
        let inbound = from_remote(
            &row(json!({ "id": "R1", "legacy_visual_blob": [1, 2, 3] })),
            "slug-x",
        )
        .unwrap();
        assert!(!inbound.payload.contains_key("visualInspectionItems"));
        assert_eq!(inbound.payload["legacy_visual_blob"], json!([1, 2, 3]));
    }

    #[test]
    fn header_sections_flatten_without_overwriting() {
        let inbound = from_remote(
            &row(json!({
                "id": "R1",
                "job_id": "J1",
                "user_id": "tech-7",
                "comments": "top-level wins",
                "report_info": { "customer": "Acme", "comments": "from header" },
                "report_data": "{\"substation\":\"North\"}",
                "data": { "customer": "ignored", "ambient": 21 }
            })),
            "slug-x",
        )
        .unwrap();

        assert_eq!(inbound.job_id.as_deref(), Some("J1"));
        assert_eq!(inbound.user_id.as_deref(), Some("tech-7"));
        assert_eq!(inbound.payload["comments"], json!("top-level wins"));
        assert_eq!(inbound.payload["customer"], json!("Acme"));
        assert_eq!(inbound.payload["substation"], json!("North"));
        assert_eq!(inbound.payload["ambient"], json!(21));
        assert!(!inbound.payload.contains_key("id"));
        assert!(!inbound.payload.contains_key("job_id"));
        assert_eq!(inbound.slug, "slug-x");
    }

    #[test]
    fn rows_without_id_are_skipped() {
        assert!(from_remote(&row(json!({ "job_id": "J1" })), "slug-x").is_none());
    }

    #[test]
    fn single_column_layouts_wrap_the_payload() {
        let report = report_with(json!({ "cables": [1, 2] }));

        let packed = to_remote(&report, "low_voltage_cable_test_12sets");
        assert_eq!(packed["report_data"], json!({ "cables": [1, 2] }));
        assert_eq!(packed["user_id"], json!("tech-7"));

        let packed = to_remote(&report, "tandelta_reports");
        assert_eq!(packed["data"], json!({ "cables": [1, 2] }));
        assert!(!packed.contains_key("report_data"));
    }

    #[test]
    fn sectioned_layout_fills_columns_from_aliases_and_drops_the_rest() {
        let report = report_with(json!({
            "customerName": "Acme",
            "jobNumber": "J-100",
            "visualInspectionItems": [{ "id": "7.22.3.A.1", "result": "Satisfactory" }],
            "contactResistance": [],
            "insulationResistance": { "readings": [1] },
            "testEquipment": { "megger": "M-1" },
            "comments": "",
            "unrelated": true
        }));

        let packed = to_remote(&report, "automatic_transfer_switch_ats_reports");

        assert_eq!(
            packed["report_info"],
            json!({ "customer": "Acme", "jobNumber": "J-100" })
        );
        assert_eq!(
            packed["visual_inspection_items"],
            json!([{ "id": "7.22.3.A.1", "result": "Satisfactory" }])
        );
        assert_eq!(packed["insulation_resistance"], json!({ "readings": [1] }));
        assert_eq!(packed["test_equipment_used"], json!({ "megger": "M-1" }));
        assert!(!packed.contains_key("contact_resistance"));
        assert!(!packed.contains_key("comments"));
        assert!(!packed.contains_key("unrelated"));
        assert_eq!(packed["id"], json!("R1"));
        assert_eq!(packed["job_id"], json!("J1"));
    }

    #[test]
    fn existing_report_info_is_sent_as_is() {
        let report = report_with(json!({
            "report_info": { "customer": "Kept" },
            "customerName": "Ignored"
        }));
        let packed = to_remote(&report, "some_future_reports");
        assert_eq!(packed["report_info"], json!({ "customer": "Kept" }));
    }

    #[test]
    fn doubly_encoded_payload_is_decoded() {
        let inner = serde_json::to_string(&json!({ "cables": [1] })).unwrap();
        let report = report_with(Value::String(serde_json::to_string(&inner).unwrap()));
        let packed = to_remote(&report, "low_voltage_cable_test_3sets");
        assert_eq!(packed["report_data"], json!({ "cables": [1] }));
    }

    #[test]
    fn patch_keeps_only_updated_at_from_identity() {
        let mut report = report_with(json!({ "cables": [1] }));
        report.created_at = Some("2026-01-01T00:00:00Z".into());
        report.updated_at = Some("2026-01-02T00:00:00Z".into());

        let patch = patch_columns(to_remote(&report, "low_voltage_cable_test_3sets"));

        assert!(!patch.contains_key("id"));
        assert!(!patch.contains_key("job_id"));
        assert!(!patch.contains_key("user_id"));
        assert!(!patch.contains_key("created_at"));
        assert_eq!(patch["updated_at"], json!("2026-01-02T00:00:00Z"));
    }

    #[test]
    fn form_instance_metadata_round_trips() {
        let inbound = form_instance_payload(&row(json!({
            "id": "F1",
            "job_id": "J1",
            "user_id": "tech-7",
            "template_id": "T9",
            "data": "{\"sections\":[{\"title\":\"Header\"}]}"
        })))
        .unwrap();

        assert_eq!(inbound.slug, FORM_INSTANCE_SLUG);
        assert_eq!(inbound.title.as_deref(), Some("Custom Form"));
        assert_eq!(inbound.payload["status"], json!("PASS"));
        assert_eq!(inbound.payload["neta_section"], Value::Null);

        let mut report = Report::draft("F1", "J1", &inbound.slug);
        report.title = "Custom Form".into();
        report.data = Value::Object(inbound.payload);
        assert!(is_form_instance(&report));

        let packed = to_form_instance_row(&report);
        assert_eq!(packed["template_id"], json!("T9"));
        assert_eq!(packed["data"], json!({ "sections": [{ "title": "Header" }] }));
        assert_eq!(packed["status"], json!("PASS"));
    }

    #[test]
    fn section_code_becomes_form_slug() {
        let inbound = form_instance_payload(&row(json!({
            "id": "F2",
            "template_id": "T1",
            "template_name": "Relay Checklist",
            "neta_section": "7.9",
            "status": "FAIL",
            "data": { "a": 1 }
        })))
        .unwrap();
        assert_eq!(inbound.slug, "7.9");
        assert_eq!(inbound.title.as_deref(), Some("Relay Checklist"));
        assert_eq!(inbound.payload["status"], json!("FAIL"));
        assert_eq!(inbound.payload["a"], json!(1));
    }

    #[test]
    fn job_projection_skips_local_only_columns() {
        let job = Job {
            id: "J1".into(),
            title: "Substation".into(),
            status: "completed".into(),
            customer_name: Some("denormalized".into()),
            ..Job::default()
        };
        let packed = job_to_remote(&job);
        assert_eq!(packed["status"], json!("completed"));
        assert!(!packed.contains_key("customer_name"));
        assert!(!packed.contains_key("dirty"));
    }
}
