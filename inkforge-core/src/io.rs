use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Reads a whole UTF-8 text file (configuration files).
pub(crate) fn read_file<P: AsRef<Path>>(filename: P) -> io::Result<String> {
	let mut contents = String::new();
	File::open(filename)?.read_to_string(&mut contents)?;
	Ok(contents)
}

/// Reads a whole binary file (checkpoints, datasets).
pub(crate) fn read_bytes<P: AsRef<Path>>(filename: P) -> io::Result<Vec<u8>> {
	fs::read(filename)
}

/// Writes `bytes` to `filename`, creating missing parent directories.
///
/// The data is first written next to the target and then renamed over it,
/// so a reader never observes a half-written checkpoint.
pub(crate) fn write_bytes<P: AsRef<Path>>(filename: P, bytes: &[u8]) -> io::Result<()> {
	let path = filename.as_ref();
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)?;
		}
	}

	let staging = staging_path(path)?;
	fs::write(&staging, bytes)?;
	fs::rename(&staging, path)
}

/// Builds the temporary sibling path used by `write_bytes`.
///
/// Example:
/// `ckpt/best.ckpt` → `ckpt/best.ckpt.partial`
fn staging_path(path: &Path) -> io::Result<PathBuf> {
	let name = path
		.file_name()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Output path has no filename"))?;

	let mut staged = name.to_os_string();
	staged.push(".partial");
	Ok(path.with_file_name(staged))
}
