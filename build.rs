// Build script: the demo binary's compute shader, GLSL -> SPIR-V
//
// Only `vulkan-engine` (the binary) loads the result, at the path in
// `graphics.shader`. The library and its tests never touch it, so a missing
// glslc is a warning rather than a build failure.

use std::path::Path;
use std::process::Command;

/// (source, output) pairs; outputs land next to their sources.
const SHADERS: &[(&str, &str)] = &[("shaders/gradient.comp", "shaders/gradient.comp.spv")];

fn main() {
    for (source, _) in SHADERS {
        println!("cargo:rerun-if-changed={}", source);
    }

    for (source, output) in SHADERS {
        compile_shader(Path::new(source), Path::new(output));
    }
}

/// Vulkan 1.3 target: the device is created at that version.
fn compile_shader(source: &Path, output: &Path) {
    let status = Command::new("glslc")
        .arg("--target-env=vulkan1.3")
        .arg(source)
        .arg("-o")
        .arg(output)
        .status();

    match status {
        Ok(status) if status.success() => {}
        Ok(status) => panic!("glslc failed on {}: {:?}", source.display(), status.code()),
        Err(e) => {
            println!(
                "cargo:warning=glslc unavailable ({}); {} not built, the demo will fail to load it",
                e,
                output.display()
            );
        }
    }
}
