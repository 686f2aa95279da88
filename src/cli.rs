pub fn print_help() {
    println!("lookout {}", env!("CARGO_PKG_VERSION"));
    println!("Watch AI coding sessions live — log tree in, dashboard out.\n");
    println!("USAGE:");
    println!("  lookout serve [OPTIONS]         Start the observability server");
    println!("  lookout help | --help | -h      Show this message");
    println!("  lookout --version | -V          Show version\n");
    println!("SERVE OPTIONS:");
    println!("  --port <n>        Port to listen on (default: 3333)");
    println!("  --root <path>     Log root to watch (default: ~/.claude)");
    println!("  --bind <addr>     Bind address (default: 127.0.0.1)");
    println!("  --allow-remote    Permit a non-loopback bind address\n");
    println!("ENVIRONMENT:");
    println!("  LOOKOUT_ROOT      Log root (same as --root)");
    println!("  LOOKOUT_PORT      Port (same as --port)");
    println!("  LOOKOUT_BIND      Bind address (same as --bind)");
    println!("  LOOKOUT_LOG       Verbosity: off | warn | info | debug (default: info)\n");
    println!("EXIT CODES:");
    println!("  0  normal shutdown       2  configuration error");
    println!("  3  port already in use   4  log root unreadable / watcher failed");
}

pub fn get_flag(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}
