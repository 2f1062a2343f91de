use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::app::{Assembly, Warning};
use crate::asset::DockerImageAsset;
use crate::environment::DeployEnvironment;

pub const MANIFEST_VERSION: &str = "1.0";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unable to write {0}: {1}")]
    Io(String, std::io::Error),

    #[error("Unable to serialize {0}: {1}")]
    Serialization(String, serde_json::Error),
}

/// Stack name, then output key, then output value.
pub type StackOutputs = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    version: &'static str,
    environment: &'a DeployEnvironment,
    stacks: Vec<ManifestStack<'a>>,
    assets: &'a [DockerImageAsset],
    warnings: &'a [Warning],
}

#[derive(Debug, Serialize)]
struct ManifestStack<'a> {
    name: &'a str,
    template_file: String,
    dependencies: Vec<&'a str>,
}

/// Writes one template per stack plus `manifest.json`. Returns the paths written.
pub fn write_assembly(out_dir: &Path, assembly: &Assembly) -> Result<Vec<PathBuf>, Error> {
    fs::create_dir_all(out_dir).map_err(|error| Error::Io(out_dir.display().to_string(), error))?;

    let mut written = vec![];
    let mut stacks = vec![];
    for stack in &assembly.stacks {
        let template_file = format!("{}.template.json", stack.name());
        let path = out_dir.join(&template_file);
        write_json(&path, stack.template())?;
        tracing::debug!(path = %path.display(), "wrote template");

        written.push(path);
        stacks.push(ManifestStack {
            name: stack.name(),
            template_file,
            dependencies: stack.dependencies().collect(),
        });
    }

    let manifest = Manifest {
        version: MANIFEST_VERSION,
        environment: &assembly.environment,
        stacks,
        assets: &assembly.assets,
        warnings: &assembly.warnings,
    };
    let path = out_dir.join("manifest.json");
    write_json(&path, &manifest)?;
    written.push(path);

    Ok(written)
}

/// Writes deployed stack outputs as `outputs.json` and matching `outputs.d.ts` typings.
pub fn write_outputs(out_dir: &Path, outputs: &StackOutputs) -> Result<Vec<PathBuf>, Error> {
    fs::create_dir_all(out_dir).map_err(|error| Error::Io(out_dir.display().to_string(), error))?;

    let json_path = out_dir.join("outputs.json");
    write_json(&json_path, outputs)?;

    let typings_path = out_dir.join("outputs.d.ts");
    write_file(&typings_path, typings(outputs).as_bytes())?;

    Ok(vec![json_path, typings_path])
}

fn typings(outputs: &StackOutputs) -> String {
    let contents = outputs
        .iter()
        .flat_map(|(stack_name, values)| {
            values
                .keys()
                .map(move |output_key| format!("    {}_{}: string;\n", stack_name, output_key))
        })
        .fold(String::from(""), |mut acc, entry| {
            acc.push_str(&entry);
            acc
        });

    format!(
        "declare namespace NodeJS {{\n  interface ProcessEnv {{\n{}  }}\n}}\n",
        contents
    )
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), Error> {
    let mut contents = serde_json::to_vec_pretty(value)
        .map_err(|error| Error::Serialization(path.display().to_string(), error))?;
    contents.push(b'\n');

    write_file(path, &contents)
}

/// Writes through a temporary file in the same directory so readers never see
/// a partial file.
fn write_file(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let io_error = |error: std::io::Error| Error::Io(path.display().to_string(), error);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(io_error)?;
    file.write_all(contents).map_err(io_error)?;
    file.persist(path).map_err(|error| io_error(error.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app;
    use crate::config::Settings;
    use tempfile::tempdir;

    fn environment() -> DeployEnvironment {
        DeployEnvironment::new(
            Some(String::from("123456789012")),
            Some(String::from("us-east-1")),
        )
    }

    #[test]
    fn writes_one_template_per_stack() {
        let dir = tempdir().unwrap();
        let assembly = app::synthesize(&Settings::default(), &environment()).unwrap();

        let written = write_assembly(dir.path(), &assembly).unwrap();
        assert_eq!(5, written.len());

        let template: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("JenkinsNetwork.template.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(
            serde_json::json!("10.0.0.0/24"),
            template["Resources"]["Vpc"]["Properties"]["CidrBlock"]
        );
    }

    #[test]
    fn manifest_lists_stacks_in_order() {
        let dir = tempdir().unwrap();
        let assembly = app::synthesize(&Settings::default(), &environment()).unwrap();
        write_assembly(dir.path(), &assembly).unwrap();

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("manifest.json")).unwrap())
                .unwrap();
        let names: Vec<&str> = manifest["stacks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|stack| stack["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            vec!["JenkinsNetwork", "JenkinsEcs", "JenkinsWorker", "JenkinsMaster"],
            names
        );
        assert_eq!(
            serde_json::json!(["JenkinsEcs", "JenkinsNetwork", "JenkinsWorker"]),
            manifest["stacks"][3]["dependencies"]
        );
        assert_eq!(
            serde_json::json!("worker_task_role_without_permissions"),
            manifest["warnings"][0]["kind"]
        );
    }

    #[test]
    fn writing_twice_is_identical() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let assembly = app::synthesize(&Settings::default(), &environment()).unwrap();

        write_assembly(first.path(), &assembly).unwrap();
        write_assembly(second.path(), &assembly).unwrap();

        for stack in &assembly.stacks {
            let file = format!("{}.template.json", stack.name());
            assert_eq!(
                fs::read(first.path().join(&file)).unwrap(),
                fs::read(second.path().join(&file)).unwrap()
            );
        }
    }

    #[test]
    fn writes_outputs_and_typings() {
        let dir = tempdir().unwrap();
        let mut outputs = StackOutputs::new();
        outputs.insert(
            String::from("JenkinsMaster"),
            BTreeMap::from([(
                String::from("ServiceURL"),
                String::from("http://jenkins.example.com"),
            )]),
        );

        write_outputs(dir.path(), &outputs).unwrap();

        let json = fs::read_to_string(dir.path().join("outputs.json")).unwrap();
        let parsed: StackOutputs = serde_json::from_str(&json).unwrap();
        assert_eq!(outputs, parsed);

        let typings = fs::read_to_string(dir.path().join("outputs.d.ts")).unwrap();
        assert!(typings.contains("JenkinsMaster_ServiceURL: string;"));
        assert!(typings.starts_with("declare namespace NodeJS {"));
    }
}
