//! Default pattern sets used by the security policy

// ============================================================
// Banned command patterns (always checked)
// ============================================================

/// Regex patterns for commands that are never run inside a resource
pub fn default_banned_commands() -> &'static [&'static str] {
    &[
        // Destructive filesystem operations
        r"rm\s+(-[a-zA-Z]+\s+)*-[a-zA-Z]*[rR][a-zA-Z]*\s+(-[a-zA-Z]+\s+)*(/|/\*|~|\$HOME)(\s|;|&|\||$)",
        r"\bmkfs(\.[a-z0-9]+)?\b",
        r"dd\s+if=.*of=/dev/[sh]d[a-z]",
        r">\s*/dev/[sh]d[a-z]",
        r"chmod\s+(-R\s+)?777\s+/(\s|$)",
        // Fork bombs
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        r"\bfork\s*while\s*fork\b",
        // Background-detaching chains
        r"\bnohup\b",
        r"&\s*disown\b",
        r"\bsetsid\b",
        // Reverse shells
        r"bash\s+-i\s+>&\s*/dev/tcp",
        r"\bnc(at)?\s+.*-e\s",
        // Host control
        r"\b(shutdown|poweroff|halt)\b",
        r"\binit\s+[06]\b",
    ]
}

// ============================================================
// Templates
// ============================================================

/// Images and OS templates allowed in strict mode unless overridden
pub fn default_templates() -> &'static [&'static str] {
    &[
        "alpine:latest",
        "ubuntu:22.04",
        "ubuntu:24.04",
        "debian:12",
        "python:3.12-slim",
        "node:20-slim",
        "Ubuntu_64",
        "Debian_64",
    ]
}

// ============================================================
// Paths
// ============================================================

/// Host path prefixes considered safe in moderate mode
pub fn safe_path_prefixes() -> &'static [&'static str] {
    &["/tmp", "/var/tmp", "/home", "/srv", "/data", "/workspace", "/opt/harbor"]
}

/// Host paths that are always denied outside permissive mode
pub fn sensitive_paths() -> &'static [&'static str] {
    &[
        "/",
        "/etc",
        "/root",
        "/boot",
        "/proc",
        "/sys",
        "/dev",
        "/bin",
        "/sbin",
        "/lib",
        "/usr/lib",
        "/var/run",
        "/var/run/docker.sock",
        "/run",
        "/var/lib/docker",
    ]
}

/// File names denied anywhere outside permissive mode
pub fn sensitive_file_names() -> &'static [&'static str] {
    &[
        ".ssh",
        ".aws",
        ".gnupg",
        ".env",
        "id_rsa",
        "id_ed25519",
        "shadow",
        "sudoers",
    ]
}

/// Binary prefixes considered safe to deploy in moderate mode
pub fn safe_binary_prefixes() -> &'static [&'static str] {
    &["/usr/local/bin", "/usr/local/lib/harbor", "/opt/harbor"]
}
