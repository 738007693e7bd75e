//! Output path naming.

use std::path::{Path, PathBuf};

/// Derive the results file path for an input file.
///
/// The result sits next to the input. Its name is the input's base name,
/// every extension appended with `_`, then `_results.txt`.
///
/// # Example
///
/// ```rust
/// use arith_orchestrator::paths::build_output_path;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(
///     build_output_path(Path::new("resources/ops.tar.xz")),
///     PathBuf::from("resources/ops_tar_xz_results.txt"),
/// );
/// ```
pub fn build_output_path(input: &Path) -> PathBuf {
    let file_name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    // A leading dot belongs to the name (".ops"), not to an extension.
    let (hidden, rest) = match file_name.strip_prefix('.') {
        Some(rest) => (".", rest),
        None => ("", file_name.as_str()),
    };
    let stem_and_suffixes = rest
        .split('.')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    input.with_file_name(format!("{hidden}{stem_and_suffixes}_results.txt"))
}

/// Path the in-process server writes its own results to, next to `output`.
///
/// Distinct from `output` so the server's sink and the client's reply file
/// never share a file.
///
/// # Example
///
/// ```rust
/// use arith_orchestrator::paths::server_results_path;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(
///     server_results_path(Path::new("out/ops_txt_results.txt")),
///     PathBuf::from("out/ops_txt_results.txt.server"),
/// );
/// ```
pub fn server_results_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "results".into());
    name.push(".server");
    output.with_file_name(name)
}
