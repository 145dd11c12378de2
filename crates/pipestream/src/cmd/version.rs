use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct BuildInfo {
    name: &'static str,
    version: &'static str,
    target: &'static str,
    profile: &'static str,
    target_os: &'static str,
    target_arch: &'static str,
    formats: [&'static str; 3],
}

impl BuildInfo {
    fn current() -> Self {
        Self {
            name: "pipestream",
            version: env!("CARGO_PKG_VERSION"),
            target: option_env!("PIPESTREAM_BUILD_TARGET").unwrap_or("unknown"),
            profile: option_env!("PIPESTREAM_BUILD_PROFILE").unwrap_or("unknown"),
            target_os: std::env::consts::OS,
            target_arch: std::env::consts::ARCH,
            formats: ["tsv", "df", "feather"],
        }
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    if !args.extended {
        println!("pipestream {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let info = BuildInfo::current();
    if matches!(format, OutputFormat::Json) {
        println!(
            "{}",
            serde_json::to_string(&info).unwrap_or_else(|_| "{}".to_string())
        );
        return Ok(SUCCESS);
    }

    println!("name: {}", info.name);
    println!("version: {}", info.version);
    println!("target: {}", info.target);
    println!("profile: {}", info.profile);
    println!("target_os: {}", info.target_os);
    println!("target_arch: {}", info.target_arch);
    println!("formats: {}", info.formats.join(", "));

    Ok(SUCCESS)
}
