use std::path::Path;

use assert_cmd::Command;
use insta_cmd::get_cargo_bin;

#[allow(dead_code)]
pub fn pagebuilder_cmd() -> Command {
	let mut cmd = Command::new(get_cargo_bin("pagebuilder"));
	cmd.env("NO_COLOR", "1");
	cmd.env_remove("RUST_LOG");
	cmd
}

/// Write `content` to `relative` under `root`, creating parent directories.
#[allow(dead_code)]
pub fn write(root: &Path, relative: &str, content: &str) {
	let path = root.join(relative);
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).unwrap_or_else(|e| panic!("mkdir: {e}"));
	}
	std::fs::write(&path, content).unwrap_or_else(|e| panic!("write {relative}: {e}"));
}
