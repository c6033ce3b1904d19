/// Quote a value for POSIX `sh` so it is read back as exactly one word.
///
/// Only used where a shell script is the artifact itself (sbatch runfiles, tmux
/// `pipe-pane`); process launches go through argv lists instead.
pub fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
