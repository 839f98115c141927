mod common;

use pagebuilder_core::AnyEmptyResult;

#[test]
fn build_uses_paths_from_dot_pagebuilder_toml() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	common::write(tmp.path(), ".pagebuilder.toml", "[paths]\npages = \"content\"\ndist = \"public\"\n");
	common::write(tmp.path(), "content/index.html", "home");

	common::pagebuilder_cmd()
		.arg("build")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success();

	assert_eq!(std::fs::read_to_string(tmp.path().join("public/index.html"))?, "home");
	assert!(!tmp.path().join("dist").exists());

	Ok(())
}

#[test]
fn build_resolves_dot_config_pagebuilder_toml() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	common::write(tmp.path(), ".config/pagebuilder.toml", "[data]\nsite_name = \"Nested\"\n");
	common::write(tmp.path(), "pages/index.html", "{{ site_name }}");

	common::pagebuilder_cmd()
		.arg("build")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success();

	assert_eq!(std::fs::read_to_string(tmp.path().join("dist/index.html"))?, "Nested");

	Ok(())
}

#[test]
fn pagebuilder_toml_takes_precedence() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	common::write(tmp.path(), "pagebuilder.toml", "[data]\nsite_name = \"Root\"\n");
	common::write(tmp.path(), ".pagebuilder.toml", "[data]\nsite_name = \"Hidden\"\n");
	common::write(tmp.path(), ".config/pagebuilder.toml", "[data]\nsite_name = \"Nested\"\n");
	common::write(tmp.path(), "pages/index.html", "{{ site_name }}");

	common::pagebuilder_cmd()
		.arg("build")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success();

	assert_eq!(std::fs::read_to_string(tmp.path().join("dist/index.html"))?, "Root");

	Ok(())
}

#[test]
fn invalid_config_is_fatal() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	common::write(tmp.path(), "pagebuilder.toml", "[build\n");

	common::pagebuilder_cmd()
		.arg("build")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.code(2)
		.stderr(predicates::str::contains("failed to parse config file"));

	Ok(())
}
