use object_store::path::{Path, PathPart};

const RUNS_PREFIX: &str = "runs";

/// Normalizes a client supplied file name into a relative path.
///
/// Backslashes are treated as separators, and empty, `.` and `..` segments are
/// dropped, so the result can never climb out of the directory it is joined to.
pub fn sanitize_path(input: &str) -> String {
    sanitized_segments(input).collect::<Vec<_>>().join("/")
}

fn sanitized_segments(input: &str) -> impl Iterator<Item = &str> {
    input
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
}

/// Portable key of a run file: `runs/<run_id>/<sanitized name>`.
///
/// Keys never contain the physical storage root, so manifests survive a root
/// move. A key is always the textual form of [`storage_location_for`].
pub fn storage_key_for(run_id: &str, filename: &str) -> String {
    storage_location_for(run_id, filename).to_string()
}

/// Object store location for a run file.
///
/// Every segment goes through [`PathPart`], which escapes delimiters and dot
/// segments, so a hostile run id stays a single directory level.
pub fn storage_location_for(run_id: &str, filename: &str) -> Path {
    let parts = std::iter::once(PathPart::from(RUNS_PREFIX))
        .chain(std::iter::once(PathPart::from(run_id)))
        .chain(sanitized_segments(filename).map(PathPart::from));
    Path::from_iter(parts)
}

/// Location of the directory holding every file of a run.
pub fn run_prefix(run_id: &str) -> Path {
    Path::from_iter([PathPart::from(RUNS_PREFIX), PathPart::from(run_id)])
}
