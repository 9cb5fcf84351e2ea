//! Script runtime helpers
//!
//! Scripts run inside a resource through the deployed script runtime, a
//! POSIX-sh compatible interpreter. With progress enabled the script body is
//! wrapped so that it can call `checkpoint NAME key=value ...` and so that
//! start and finish markers are always emitted.

use uuid::Uuid;

/// Checkpoint emitted before the script body runs
pub const START_MARKER: &str = "harbor.start";
/// Checkpoint emitted after the script body, carrying its exit status
pub const FINISH_MARKER: &str = "harbor.finish";

/// Shell function behind `checkpoint NAME key=value ...`
///
/// Each argument is re-emitted single-quoted (embedded `'` becomes `'\''`)
/// so values with spaces reach the parser as one `key=value` token.
const CHECKPOINT_HELPER: &str = r#"checkpoint() {
  __harbor_line="CHECKPOINT $1"; shift
  for __harbor_arg in "$@"; do
    __harbor_q=
    while :; do
      case $__harbor_arg in
        *\'*)
          __harbor_head=${__harbor_arg%%\'*}
          __harbor_q="$__harbor_q$__harbor_head'\\''"
          __harbor_arg=${__harbor_arg#*\'}
          ;;
        *)
          __harbor_q="$__harbor_q$__harbor_arg"
          break
          ;;
      esac
    done
    __harbor_line="$__harbor_line '$__harbor_q'"
  done
  printf '%s\n' "$__harbor_line"
}
"#;

/// Wrap `script` with the checkpoint helper and start/finish markers
pub fn wrap_with_checkpoints(script: &str) -> String {
    let mut wrapped = String::with_capacity(script.len() + 256);
    wrapped.push_str(CHECKPOINT_HELPER);
    wrapped.push_str(&format!("checkpoint {} percent=0\n", START_MARKER));
    wrapped.push_str("(\n");
    wrapped.push_str(script.trim_end());
    wrapped.push_str("\n)\n");
    wrapped.push_str("__harbor_status=$?\n");
    wrapped.push_str(&format!(
        "checkpoint {} percent=100 status=$__harbor_status\n",
        FINISH_MARKER
    ));
    wrapped.push_str("exit $__harbor_status\n");
    wrapped
}

/// Fresh upload path for a script inside `dir`
pub fn script_path(dir: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}/harbor-script-{}.sh", dir.trim_end_matches('/'), &id[..12])
}

/// Command that runs an uploaded script with the deployed runtime
pub fn run_command(runtime_path: &str, script_path: &str) -> String {
    format!("{} {}", runtime_path, script_path)
}
