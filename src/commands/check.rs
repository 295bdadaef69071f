//! Check command implementation.
//!
//! Validates system requirements and configuration.

use herakles_sampler::collectors::{diskstats, filesystem, netdev};
use herakles_sampler::process::{ProcessTableProvider, ProcfsProcessTable};
use herakles_sampler::Platform;
use std::fs;
use std::path::Path;

use crate::config::{validate_effective_config, Config};

/// Files the collectors read below the proc root.
const PROC_FILES: &[&str] = &["stat", "loadavg", "meminfo", "diskstats", "mounts", "net/dev", "uptime"];

/// Validates system requirements and configuration.
pub fn command_check(proc: bool, all: bool, config: &Config) -> anyhow::Result<()> {
    println!("🔍 Herakles Sampler - System Check");
    println!("==================================");

    let mut all_ok = true;
    let root = config.proc_root();

    println!("\n🖥️  Platform: {}", Platform::current());
    if !Platform::current().has_procfs() {
        println!("   ⚠️  No procfs on this platform, collectors will report nothing");
    }

    // Check /proc filesystem
    if proc || all {
        println!("\n📁 Checking {} ...", root.display());
        if root.exists() {
            for file in PROC_FILES {
                let path = root.join(file);
                match fs::read_to_string(&path) {
                    Ok(_) => println!("   ✅ {} readable", path.display()),
                    Err(e) => {
                        println!("   ❌ {}: {}", path.display(), e);
                        all_ok = false;
                    }
                }
            }
            all_ok &= check_parsers(&root);
            all_ok &= check_process_table(&root);
        } else {
            println!("   ❌ {} not found", root.display());
            all_ok = false;
        }
    }

    if all {
        check_privileges();
        all_ok &= check_state_file(&config.state_file());
    }

    // Check configuration
    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => {
            println!("   ✅ Configuration is valid");
        }
        Err(e) => {
            println!("   ❌ Configuration invalid: {:#}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}

fn check_parsers(root: &Path) -> bool {
    let mut ok = true;
    match diskstats::read_diskstats(root) {
        Ok(stats) => println!("   ✅ {} block devices in diskstats", stats.len()),
        Err(e) => {
            println!("   ❌ diskstats: {}", e);
            ok = false;
        }
    }
    match filesystem::read_mounts(root) {
        Ok(mounts) => println!("   ✅ {} mounted block devices", mounts.len()),
        Err(e) => {
            println!("   ❌ mounts: {}", e);
            ok = false;
        }
    }
    match netdev::read_netdev(root) {
        Ok(interfaces) => println!("   ✅ {} network interfaces", interfaces.len()),
        Err(e) => {
            println!("   ❌ net/dev: {}", e);
            ok = false;
        }
    }
    ok
}

fn check_process_table(root: &Path) -> bool {
    let mut table = ProcfsProcessTable::new(root);
    match table.process_table() {
        Ok(processes) if processes.is_empty() => {
            println!("   ❌ Cannot read any process entries");
            false
        }
        Ok(processes) => {
            println!(
                "   ✅ Can read {} processes ({} CPUs, {} ticks/s)",
                processes.len(),
                table.num_processors(),
                table.tick_rate()
            );
            true
        }
        Err(e) => {
            println!("   ❌ Process table: {}", e);
            false
        }
    }
}

fn check_privileges() {
    println!("\n🔐 Checking privileges...");
    if nix::unistd::geteuid().is_root() {
        println!("   ✅ Running as root");
    } else {
        println!("   ⚠️  Not running as root, processes of other users may be missing");
    }
}

fn check_state_file(path: &Path) -> bool {
    println!("\n💾 Checking state file...");
    let dir = match path.parent().filter(|d| !d.as_os_str().is_empty()) {
        Some(dir) => dir,
        None => Path::new("."),
    };
    if !dir.exists() {
        println!("   ⚠️  {} does not exist yet, it will be created", dir.display());
        return true;
    }
    match nix::unistd::access(dir, nix::unistd::AccessFlags::W_OK) {
        Ok(()) => {
            println!("   ✅ {} is writable", dir.display());
            true
        }
        Err(e) => {
            println!("   ❌ {} is not writable: {}", dir.display(), e);
            false
        }
    }
}
