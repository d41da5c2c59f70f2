//! Key, license and firmware release commands
//!
//! Each command opens a flash session, resolves the board model against
//! the whole catalog, runs one operation and closes the device.

use cfaflash_core::flash::opcodes::Status;
use cfaflash_core::model::{catalog_candidates, MatchOptions, ModelCatalog};
use cfaflash_core::transport::{RegisterDevice, SystemClock};
use cfaflash_core::upgrade::FlashSession;
use cfaflash_core::Result;

use super::hex_dump;

/// Run `op` on a session whose model has been resolved from `catalog`
///
/// The device is closed afterwards; a close failure is only reported when
/// the operation itself succeeded.
fn with_session<D, T>(
    device: D,
    catalog: &ModelCatalog,
    op: impl FnOnce(&mut FlashSession<D, SystemClock>) -> Result<T>,
) -> Result<T>
where
    D: RegisterDevice,
{
    let mut session = FlashSession::new(device, SystemClock::new());
    let result = session
        .resolve(&catalog_candidates(catalog), &MatchOptions::default())
        .and_then(|model| {
            log::info!(
                "Board identified as model {}{}",
                model.model_id(),
                model
                    .name
                    .as_deref()
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default()
            );
            op(&mut session)
        });
    let closed = session.close();
    let value = result?;
    closed?;
    Ok(value)
}

/// Show the security register and the key
pub fn cmd_keyinfo<D: RegisterDevice>(
    device: D,
    catalog: &ModelCatalog,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let (status, security, key) = with_session(device, catalog, |session| {
        Ok((
            session.read_status()?,
            session.read_security_register()?,
            session.read_key()?,
        ))
    })?;

    println!("Flash status: {}", describe_status(status));
    println!("Security register:");
    for line in hex_dump(&security) {
        println!("  {}", line);
    }
    println!("Key: {:016X}", key);
    Ok(())
}

fn describe_status(status: Status) -> String {
    let mut flags = vec![if status.contains(Status::READY) { "ready" } else { "busy" }];
    if status.contains(Status::PROTECT) {
        flags.push("protected");
    }
    if status.contains(Status::PAGE_SIZE) {
        flags.push("binary pages");
    }
    format!("0x{:02X} ({})", status.bits(), flags.join(", "))
}

/// Write `key` to the license page
pub fn cmd_setkey<D: RegisterDevice>(
    device: D,
    key: u64,
    catalog: &ModelCatalog,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    with_session(device, catalog, |session| session.write_key(key))?;
    println!("Key {:016X} written.", key);
    Ok(())
}

/// Show the license data, or erase it when `delete` is set
pub fn cmd_license<D: RegisterDevice>(
    device: D,
    delete: bool,
    catalog: &ModelCatalog,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    if delete {
        with_session(device, catalog, |session| session.delete_license())?;
        println!("License data deleted.");
        return Ok(());
    }

    let license = with_session(device, catalog, |session| session.read_license())?;
    if license.iter().all(|&b| b == 0xFF) {
        println!("No license data.");
    } else {
        println!("License data ({} bytes):", license.len());
        for line in hex_dump(&license) {
            println!("  {}", line);
        }
    }
    Ok(())
}

/// Show the release of the running firmware
pub fn cmd_fwrelease<D: RegisterDevice>(
    device: D,
    register: u32,
    catalog: &ModelCatalog,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let release = with_session(device, catalog, |session| {
        session.read_firmware_release(register)
    })?;
    println!("Firmware release: {}", release);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_status() {
        assert_eq!(describe_status(Status::READY), "0x80 (ready)");
        assert_eq!(
            describe_status(Status::PROTECT | Status::PAGE_SIZE),
            "0x03 (busy, protected, binary pages)"
        );
    }
}
