pub const REPORT_MARKER: &str = "report:";

/// Report reference decoded from an asset's `file_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLocator {
    pub job_id: Option<String>,
    pub slug: String,
    pub report_id: String,
}

/// Parses `report:/jobs/{job}/{slug}/{id}[?query]`.
///
/// Returns `None` for plain file locators and for markers too short to carry
/// a slug and an id.
pub fn parse_report_locator(file_url: &str) -> Option<ReportLocator> {
    let rest = file_url.strip_prefix(REPORT_MARKER)?;
    let path = rest.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let [.., slug, report_id] = segments.as_slice() else {
        return None;
    };
    // The job segment must sit strictly before the slug.
    let job_id = segments
        .iter()
        .position(|s| *s == "jobs")
        .filter(|idx| idx + 4 <= segments.len())
        .map(|idx| segments[idx + 1].to_string());

    Some(ReportLocator {
        job_id,
        slug: slug.to_string(),
        report_id: report_id.to_string(),
    })
}

pub fn is_report_locator(file_url: &str) -> bool {
    file_url.starts_with(REPORT_MARKER)
}
