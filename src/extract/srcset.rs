/// Pick the preferred URL from a `srcset` value: the URL of the last listed candidate.
///
/// Candidates are comma-separated `url descriptor` pairs; the trailing entry is taken
/// as the highest resolution by convention, descriptors are not compared.
pub fn pick_best_from_srcset(srcset: Option<&str>) -> Option<String> {
    srcset?
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .last()
        .and_then(|entry| entry.split_whitespace().next())
        .map(str::to_string)
}
