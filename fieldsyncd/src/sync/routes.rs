use std::collections::HashMap;
use std::sync::OnceLock;

pub const UNKNOWN_SLUG: &str = "unknown";

/// Report type slug → remote resource. Order matters: the first slug listed
/// for a resource is its canonical slug.
const ROUTES: &[(&str, &str)] = &[
    (
        "switchgear-switchboard-assemblies-ats25",
        "switchgear_switchboard_ats25_reports",
    ),
    (
        "panelboard-assemblies-ats25",
        "panelboard_assemblies_ats25_reports",
    ),
    ("panelboard-report", "panelboard_reports"),
    ("switchgear-report", "switchgear_reports"),
    ("dry-type-transformer", "transformer_reports"),
    ("large-dry-type-transformer-report", "large_transformer_reports"),
    ("large-dry-type-transformer", "large_transformer_reports"),
    (
        "large-dry-type-transformer-mts-report",
        "large_dry_type_transformer_mts_reports",
    ),
    (
        "large-dry-type-xfmr-mts-report",
        "large_dry_type_transformer_mts_reports",
    ),
    (
        "liquid-xfmr-visual-mts-report",
        "liquid_xfmr_visual_mts_reports",
    ),
    ("low-voltage-switch-report", "low_voltage_switch_reports"),
    (
        "medium-voltage-switch-oil-report",
        "medium_voltage_switch_oil_reports",
    ),
    ("medium-voltage-switch-sf6", "medium_voltage_switch_sf6_reports"),
    (
        "medium-voltage-switch-sf6-report",
        "medium_voltage_switch_sf6_reports",
    ),
    (
        "potential-transformer-ats-report",
        "potential_transformer_ats_reports",
    ),
    (
        "low-voltage-panelboard-small-breaker-report",
        "low_voltage_panelboard_small_breaker_reports",
    ),
    (
        "medium-voltage-circuit-breaker-report",
        "medium_voltage_circuit_breaker_reports",
    ),
    (
        "medium-voltage-circuit-breaker-mts-report",
        "medium_voltage_circuit_breaker_mts_reports",
    ),
    ("medium-voltage-vlf-mts-report", "medium_voltage_vlf_mts_reports"),
    (
        "medium-voltage-cable-vlf-test-mts",
        "medium_voltage_cable_vlf_test",
    ),
    ("medium-voltage-vlf", "medium_voltage_vlf_mts_reports"),
    ("medium-voltage-vlf-tan-delta", "tandelta_reports"),
    ("medium-voltage-vlf-tan-delta-mts", "tandelta_mts_reports"),
    ("electrical-tan-delta-test-mts-form", "tandelta_mts_reports"),
    ("medium-voltage-cable-vlf-test", "medium_voltage_cable_vlf_test"),
    (
        "current-transformer-test-ats-report",
        "current_transformer_test_ats_reports",
    ),
    (
        "12-current-transformer-test-ats-report",
        "current_transformer_test_ats_reports",
    ),
    (
        "12-current-transformer-test-mts-report",
        "current_transformer_test_mts_reports",
    ),
    (
        "13-voltage-potential-transformer-test-mts-report",
        "voltage_potential_transformer_mts_reports",
    ),
    (
        "23-medium-voltage-motor-starter-mts-report",
        "medium_voltage_motor_starter_mts_reports",
    ),
    (
        "23-medium-voltage-switch-mts-report",
        "medium_voltage_switch_mts_reports",
    ),
    ("metal-enclosed-busway", "metal_enclosed_busway_reports"),
    (
        "low-voltage-circuit-breaker-thermal-magnetic-mts-report",
        "low_voltage_circuit_breaker_thermal_magnetic_mts_reports",
    ),
    (
        "low-voltage-circuit-breaker-electronic-trip-ats-report",
        "low_voltage_circuit_breaker_electronic_trip_ats",
    ),
    (
        "low-voltage-circuit-breaker-electronic-trip-ats-primary-injection",
        "low_voltage_circuit_breaker_electronic_trip_ats",
    ),
    (
        "8-low-voltage-circuit-breaker-electronic-trip-unit-ats-primary-injection",
        "low_voltage_circuit_breaker_electronic_trip_ats",
    ),
    (
        "low-voltage-circuit-breaker-electronic-trip-ats-secondary-injection-report",
        "low_voltage_circuit_breaker_electronic_trip_ats",
    ),
    (
        "low-voltage-circuit-breaker-thermal-magnetic-ats-report",
        "low_voltage_circuit_breaker_thermal_magnetic_ats",
    ),
    (
        "automatic-transfer-switch-ats-report",
        "automatic_transfer_switch_ats_reports",
    ),
    (
        "low-voltage-circuit-breaker-electronic-trip-mts-report",
        "low_voltage_circuit_breaker_electronic_trip_mts",
    ),
    (
        "low-voltage-circuit-breaker-electronic-trip-mts",
        "low_voltage_circuit_breaker_electronic_trip_mts",
    ),
    (
        "low-voltage-circuit-breaker-electronic-trip-unit-mts",
        "low_voltage_circuit_breaker_electronic_trip_mts",
    ),
    (
        "two-small-dry-typer-xfmr-mts-report",
        "two_small_dry_type_xfmr_mts_reports",
    ),
    ("low-voltage-cable-test-3sets", "low_voltage_cable_test_3sets"),
    ("low-voltage-cable-test-12sets", "low_voltage_cable_test_12sets"),
    ("low-voltage-cable-test-20sets", "low_voltage_cable_test_20sets"),
    (
        "low-voltage-switch-multi-device-test",
        "low_voltage_switch_multi_device_reports",
    ),
    (
        "two-small-dry-typer-xfmr-ats-report",
        "two_small_dry_type_xfmr_ats_reports",
    ),
    (
        "small-lv-dry-type-transformer-ats25",
        "small_lv_dry_type_transformer_ats25_reports",
    ),
    (
        "switchgear-panelboard-mts-report",
        "switchgear_panelboard_mts_reports",
    ),
    ("liquid-filled-transformer", "liquid_filled_transformer_reports"),
    ("liquid-filled-xfmr-ats25", "liquid_filled_xfmr_ats25_reports"),
    ("oil-inspection", "oil_inspection_reports"),
    (
        "low-voltage-switch-maint-mts-report",
        "low_voltage_switch_maint_mts_reports",
    ),
    (
        "6-low-voltage-switch-maint-mts-report",
        "low_voltage_switch_maint_mts_reports",
    ),
    (
        "grounding-fall-of-potential-slope-method",
        "grounding_fall_of_potential_slope_method_test_reports",
    ),
    (
        "grounding-fall-of-potential-slope-method-test",
        "grounding_fall_of_potential_slope_method_test_reports",
    ),
    ("grounding-system-master", "grounding_system_master_reports"),
    (
        "low-voltage-switch-multi-device-report",
        "low_voltage_switch_multi_device_test_reports",
    ),
    ("tan-delta-test-mts", "tan_delta_test_mts"),
    (
        "automatic-transfer-switch-ats",
        "automatic_transfer_switch_ats_reports",
    ),
    ("generated-document", "generated_documents"),
    // Slugs only ever produced by local report editors.
    ("3-low-voltage-cable-ats", "low_voltage_cable_test_12sets"),
    ("3-low-voltage-cable-mts", "low_voltage_cable_test_3sets"),
    ("oil-analysis", "oil_analysis_reports"),
    ("relay-test-report", "relay_test_reports"),
];

#[derive(Debug)]
pub struct TypeRouter {
    by_slug: HashMap<&'static str, &'static str>,
    by_resource: HashMap<&'static str, &'static str>,
}

impl TypeRouter {
    fn from_table(table: &'static [(&'static str, &'static str)]) -> Self {
        let mut by_slug = HashMap::with_capacity(table.len());
        let mut by_resource = HashMap::new();
        for &(slug, resource) in table {
            by_slug.entry(slug).or_insert(resource);
            by_resource.entry(resource).or_insert(slug);
        }
        Self {
            by_slug,
            by_resource,
        }
    }

    /// Process-wide router built from the static route table.
    pub fn global() -> &'static TypeRouter {
        static ROUTER: OnceLock<TypeRouter> = OnceLock::new();
        ROUTER.get_or_init(|| TypeRouter::from_table(ROUTES))
    }

    pub fn resource_for(&self, slug: &str) -> Option<&'static str> {
        self.by_slug.get(slug).copied()
    }

    pub fn slug_for(&self, resource: &str) -> &'static str {
        self.by_resource
            .get(resource)
            .copied()
            .unwrap_or(UNKNOWN_SLUG)
    }

    pub fn slugs(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_slug.keys().copied()
    }
}
