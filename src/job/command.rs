//! Argument lists for the supported tools.

use super::{JobConfig, ToolKind};
use crate::utils::render_command;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A fully built invocation: program, argv and an optional `PATH` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub path_prefix: Option<PathBuf>,
}

impl ToolCommand {
    /// Builds the command for one sample.
    ///
    /// `inputs` must follow the configured layout (forward file first for
    /// paired data). Viral profiling only ever adds arguments.
    pub fn build(config: &JobConfig, sample: &str, inputs: &[PathBuf], out_dir: &Path) -> Self {
        let mut tool_args: Vec<OsString> = Vec::new();
        let mut push = |flag: &str, value: OsString| {
            tool_args.push(flag.into());
            tool_args.push(value);
        };

        match config.tool {
            ToolKind::Kneaddata => {
                match inputs {
                    [forward, reverse] => {
                        push("--input1", forward.into());
                        push("--input2", reverse.into());
                    }
                    _ => {
                        for input in inputs {
                            push("--unpaired", input.into());
                        }
                    }
                }
                push("--reference-db", config.reference_db.clone().into());
                push("--output", out_dir.into());
                push("--output-prefix", sample.into());
                push("--threads", config.threads.to_string().into());
            }
            ToolKind::Humann => {
                for input in inputs {
                    push("--input", input.into());
                }
                push("--output", out_dir.into());
                push("--output-basename", sample.into());
                push("--threads", config.threads.to_string().into());
                push("--nucleotide-database", config.reference_db.clone().into());
                if let Some(protein_db) = &config.protein_db {
                    push("--protein-database", protein_db.into());
                }

                let mut metaphlan: Vec<String> = config.metaphlan_options.clone();
                if config.viral_profiling {
                    let vsc_out = out_dir.join(format!("{}_vsc_profile.tsv", sample));
                    metaphlan.push("--profile_vsc".to_string());
                    metaphlan.push("--vsc_out".to_string());
                    metaphlan.push(vsc_out.to_string_lossy().into_owned());
                }
                if !metaphlan.is_empty() {
                    push("--metaphlan-options", metaphlan.join(" ").into());
                }
            }
        }
        tool_args.extend(config.extra_args.iter().map(OsString::from));

        let executable: OsString = config.executable().into();
        let (program, args) = match config.launcher.split_first() {
            Some((launcher, rest)) => {
                let mut args: Vec<OsString> = rest.iter().map(OsString::from).collect();
                args.push(executable);
                args.extend(tool_args);
                (OsString::from(launcher), args)
            }
            None => (executable, tool_args),
        };

        ToolCommand {
            program,
            args,
            path_prefix: config.bin_dir.clone(),
        }
    }

    pub fn render(&self) -> String {
        render_command(&self.program, &self.args)
    }

    pub fn to_command(&self) -> anyhow::Result<Command> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(bin_dir) = &self.path_prefix {
            command.env("PATH", crate::utils::path_with_prefix(bin_dir)?);
        }
        Ok(command)
    }

    /// Whether the argv contains `flag` immediately followed by `value`.
    pub fn has_pair(&self, flag: &str, value: &str) -> bool {
        self.args
            .windows(2)
            .any(|w| w[0] == OsString::from(flag) && w[1] == OsString::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::InputLayout;

    fn paired_inputs() -> Vec<PathBuf> {
        vec![PathBuf::from("raw/S2_1.fq.gz"), PathBuf::from("raw/S2_2.fq.gz")]
    }

    #[test]
    fn test_kneaddata_paired_arguments() {
        let mut config = JobConfig::new(ToolKind::Kneaddata, "/db/hg37");
        config.threads = 16;
        config.extra_args = vec!["--run-trim-repetitive".to_string()];
        let cmd = ToolCommand::build(&config, "S2", &paired_inputs(), Path::new("out/S2"));

        assert_eq!(cmd.program, OsString::from("kneaddata"));
        assert!(cmd.has_pair("--input1", "raw/S2_1.fq.gz"));
        assert!(cmd.has_pair("--input2", "raw/S2_2.fq.gz"));
        assert!(cmd.has_pair("--reference-db", "/db/hg37"));
        assert!(cmd.has_pair("--output", "out/S2"));
        assert!(cmd.has_pair("--threads", "16"));
        assert_eq!(cmd.args.last(), Some(&OsString::from("--run-trim-repetitive")));
    }

    #[test]
    fn test_kneaddata_single_file_is_unpaired() {
        let mut config = JobConfig::new(ToolKind::Kneaddata, "/db/hg37");
        config.layout = Some(InputLayout::default_merged());
        let cmd = ToolCommand::build(
            &config,
            "S1",
            &[PathBuf::from("raw/S1.fastq")],
            Path::new("out/S1"),
        );
        assert!(cmd.has_pair("--unpaired", "raw/S1.fastq"));
    }

    #[test]
    fn test_viral_profiling_is_a_superset() {
        let mut base = JobConfig::new(ToolKind::Humann, "/db/choco");
        base.protein_db = Some(PathBuf::from("/db/uniref"));
        base.metaphlan_options = vec!["--bowtie2db".to_string(), "/db/mpa".to_string()];
        let mut viral = base.clone();
        viral.viral_profiling = true;

        let inputs = [PathBuf::from("merged/S3.fastq")];
        let plain = ToolCommand::build(&base, "S3", &inputs, Path::new("out/S3"));
        let extended = ToolCommand::build(&viral, "S3", &inputs, Path::new("out/S3"));

        assert!(plain.has_pair("--metaphlan-options", "--bowtie2db /db/mpa"));
        assert!(extended.has_pair(
            "--metaphlan-options",
            "--bowtie2db /db/mpa --profile_vsc --vsc_out out/S3/S3_vsc_profile.tsv"
        ));
        for pair in plain.args.windows(2).filter(|w| w[0] != "--metaphlan-options") {
            assert!(extended.args.windows(2).any(|w| w == pair));
        }
        assert!(extended.has_pair("--protein-database", "/db/uniref"));
    }

    #[test]
    fn test_launcher_prefix() {
        let mut config = JobConfig::new(ToolKind::Humann, "/db/choco");
        config.launcher = vec![
            "conda".to_string(),
            "run".to_string(),
            "-n".to_string(),
            "humann".to_string(),
        ];
        let cmd = ToolCommand::build(
            &config,
            "S1",
            &[PathBuf::from("S1.fastq")],
            Path::new("out/S1"),
        );
        assert_eq!(cmd.program, OsString::from("conda"));
        assert_eq!(
            &cmd.args[..4],
            &[
                OsString::from("run"),
                OsString::from("-n"),
                OsString::from("humann"),
                OsString::from("humann")
            ]
        );
        assert!(cmd.render().starts_with("conda run -n humann humann --input S1.fastq"));
    }
}
