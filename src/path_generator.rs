use crate::classifier::CalendarBucket;

/// Generates destination folder segments based on calendar buckets
/// Single Responsibility: Only concerned with path generation logic
pub struct PathGenerator;

impl PathGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generates segments in format: YYYY/MM/<relative path>
    pub fn generate_segments(&self, bucket: &CalendarBucket, relative_path: &str) -> Vec<String> {
        let mut segments = vec![bucket.year.clone(), bucket.month.clone()];
        segments.extend(sanitize_segments(relative_path));
        segments
    }
}

impl Default for PathGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a slash separated relative path, dropping empty, `.` and `..` parts.
pub fn sanitize_segments(relative_path: &str) -> Vec<String> {
    relative_path
        .split('/')
        .filter(|segment| !segment.trim().is_empty() && *segment != "." && *segment != "..")
        .map(str::to_string)
        .collect()
}

/// Appends a folder name to a relative path.
pub fn join_relative(relative_path: &str, name: &str) -> String {
    if relative_path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", relative_path, name)
    }
}

/// A four digit folder name between 1900 and 2100.
pub fn is_year_folder(name: &str) -> bool {
    name.len() == 4
        && name.bytes().all(|b| b.is_ascii_digit())
        && name.parse::<u32>().map_or(false, |year| (1900..=2100).contains(&year))
}

/// A two digit folder name between 01 and 12.
pub fn is_month_folder(name: &str) -> bool {
    name.len() == 2
        && name.bytes().all(|b| b.is_ascii_digit())
        && name.parse::<u32>().map_or(false, |month| (1..=12).contains(&month))
}
