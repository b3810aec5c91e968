//! `keel init` — create a new project skeleton.

use std::path::Path;

use anyhow::{bail, Context, Result};
use keel_manifest::validate_name;

/// Create `<cwd>/<name>` with a manifest and a hello-world source.
pub fn run(cwd: &Path, name: &str) -> Result<()> {
    let target = cwd.join(name);
    create_project(&target, name)?;
    println!("Created project '{name}' at {}", target.display());
    Ok(())
}

/// Lay out a fresh project directory.
pub fn create_project(path: &Path, name: &str) -> Result<()> {
    validate_name(name)?;
    if path.join(keel_manifest::MANIFEST_FILE).exists() {
        bail!("{} already contains a keel project", path.display());
    }
    std::fs::create_dir_all(path.join("src"))
        .with_context(|| format!("creating {}", path.display()))?;

    std::fs::write(path.join(keel_manifest::MANIFEST_FILE), manifest_template(name))?;
    std::fs::write(
        path.join("src").join("main.cc"),
        "#include <iostream>\n\nint main() {\n  std::cout << \"Hello, keel!\\n\";\n  return 0;\n}\n",
    )?;
    std::fs::write(path.join(".gitignore"), "/keel-out/\n")?;
    Ok(())
}

fn manifest_template(name: &str) -> String {
    format!(
        r#"[package]
name = "{name}"
version = "0.1.0"
edition = "17"

[dependencies]
"#
    )
}
