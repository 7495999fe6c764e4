//! Version command - show version information

use crate::cli::args::VersionArgs;

pub fn execute(args: VersionArgs) {
    print_version(args.detailed);
}

/// Print the name and version, plus build details when `detailed`
pub fn print_version(detailed: bool) {
    println!("{} {}", crate::NAME, crate::VERSION);

    if detailed {
        println!();
        println!("Build info:");
        println!("  Target:     {}", env!("SOCKETAUTH_BUILD_TARGET"));
        println!("  Profile:    {}", env!("SOCKETAUTH_BUILD_PROFILE"));
        println!("  Rust:       {}", env!("SOCKETAUTH_RUSTC_VERSION"));
        if let Ok(exe) = std::env::current_exe() {
            println!("  Executable: {}", exe.display());
        }
        println!();
        println!("Protocol:");
        println!("  Header:     {}", crate::tunnel::COMMAND_HEADER);
        println!("  Path:       {}", crate::gateway::DEFAULT_PATH);
    }
}
