use anyhow::{Context, Result};
use guidewalk::platforms::memory::PageFixture;
use guidewalk::{EngineConfig, MemoryPage, Section, StaticEnvironment};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// A guide file holds either one section or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GuideFile {
    Many { sections: Vec<Section> },
    List(Vec<Section>),
    One(Section),
}

/// Sections loaded from one guide file, keyed by the file stem.
#[derive(Debug)]
pub struct Guide {
    pub content_key: String,
    pub sections: Vec<Section>,
}

pub fn read_guide(path: &Path) -> Result<Guide> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read guide {}", path.display()))?;
    let parsed: GuideFile = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse guide {}", path.display()))?;
    let sections = match parsed {
        GuideFile::Many { sections } | GuideFile::List(sections) => sections,
        GuideFile::One(section) => vec![section],
    };
    let content_key = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "guide".to_string());
    debug!("Loaded {} section(s) from {}", sections.len(), path.display());
    Ok(Guide {
        content_key,
        sections,
    })
}

pub fn read_page(path: &Path) -> Result<MemoryPage> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read page fixture {}", path.display()))?;
    let fixture: PageFixture = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse page fixture {}", path.display()))?;
    info!("Page fixture {} at {}", path.display(), fixture.path);
    Ok(MemoryPage::from_fixture(fixture))
}

pub fn read_environment(path: Option<&Path>) -> Result<StaticEnvironment> {
    match path {
        Some(path) => Ok(StaticEnvironment::from_file(path)?),
        None => Ok(StaticEnvironment::default()),
    }
}

pub fn read_config(path: Option<&Path>, fast: bool) -> Result<EngineConfig> {
    match (path, fast) {
        (Some(path), _) => Ok(EngineConfig::from_file(path)?),
        (None, true) => Ok(EngineConfig::fast()),
        (None, false) => Ok(EngineConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn guide_files_accept_one_or_many_sections() {
        let dir = tempfile::tempdir().unwrap();
        let step = r##"{"id": "a", "type": "simple", "action": {"kind": "highlight", "target": "#x"}}"##;

        let one = write(&dir, "intro.json", &format!(r#"{{"id": "s1", "steps": [{step}]}}"#));
        let guide = read_guide(&one).unwrap();
        assert_eq!(guide.content_key, "intro");
        assert_eq!(guide.sections.len(), 1);

        let many = write(
            &dir,
            "tour.json",
            &format!(r#"{{"sections": [{{"id": "s1", "steps": [{step}]}}, {{"id": "s2"}}]}}"#),
        );
        assert_eq!(read_guide(&many).unwrap().sections.len(), 2);
    }

    #[test]
    fn page_fixture_defaults_to_root_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "page.json", r#"{"root": {"tag": "body"}}"#);
        let page = read_page(&path).unwrap();
        assert_eq!(guidewalk::PageEngine::current_path(&page), "/");
    }

    #[test]
    fn missing_files_are_reported_with_context() {
        let err = read_page(Path::new("/nonexistent/page.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read page fixture"));
    }
}
