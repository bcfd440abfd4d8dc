pub mod bindings;
pub mod config;
pub mod constant_group;
pub mod declaration;
pub mod device;
pub mod doc;
pub mod element;
pub mod error;
pub mod formater;
pub mod packet;
pub mod stream;
pub mod types;
pub mod validate;

mod enumeration;
mod function;
mod helper;

use std::path::{Path, PathBuf};

use anyhow::Context;
use log::{debug, info};

pub use bindings::{Backend, GeneratedFile, RustBackend};
pub use config::GeneratorConfig;
pub use declaration::DeviceDecl;
pub use device::Device;
pub use error::{Error, Result, Violations};

/// Builds the IR of one device, expands its streams and validates it.
///
/// A device that can't be built stops there. Expansion and validation
/// violations are returned together, packets that failed to expand keep
/// their declared shape for the validation.
pub fn compile(
    decl: &DeviceDecl,
    config: &GeneratorConfig,
) -> std::result::Result<Device, Violations> {
    let mut device = Device::build(decl)?;
    let mut violations = Violations::new(decl.name.clone());

    violations.extend(stream::expand_all(&mut device.packets, &config.transport));
    violations.extend(validate::validate_expanded(&device, &config.transport));
    debug!(
        "{}: {} violation(s) after validation",
        device.name,
        violations.errors.len()
    );
    violations.into_result(device)
}

/// Loads and compiles a declaration file without generating anything.
pub fn check_device_file(
    path: &Path,
    config: &GeneratorConfig,
) -> anyhow::Result<Device> {
    let decl = declaration::load(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let device = compile(&decl, config)?;
    Ok(device)
}

/// Compiles `path` and writes what `backend` emits for it into `out_dir`.
/// Returns the written files.
pub fn generate_device_files(
    path: &Path,
    out_dir: &Path,
    config: &GeneratorConfig,
    backend: &dyn Backend,
) -> anyhow::Result<Vec<PathBuf>> {
    let device = check_device_file(path, config)?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let mut written = vec![];
    for file in backend.generate(&device) {
        let target = out_dir.join(&file.path);
        std::fs::write(&target, file.contents.as_bytes())
            .with_context(|| format!("writing {}", target.display()))?;
        info!("{}: wrote {}", backend.name(), target.display());
        written.push(target);
    }
    Ok(written)
}
