//! Bash completion for `ds`. Snapshot names are looked up while completing,
//! through the hidden `names` subcommand.

use clap::Command;

/// Subcommands whose argument is an existing snapshot name.
const TAKES_SNAPSHOT: &[&str] = &["delete", "restore"];

/// Completion script for `cmd`, to be sourced by bash:
/// `source <(ds completions)`.
pub fn bash_script(cmd: &Command) -> String {
    let bin = cmd.get_name();
    let mut words = Vec::new();
    let mut snapshot_words = Vec::new();

    for sub in cmd.get_subcommands().filter(|sub| !sub.is_hide_set()) {
        let spellings: Vec<&str> = std::iter::once(sub.get_name())
            .chain(sub.get_visible_aliases())
            .collect();
        if TAKES_SNAPSHOT.contains(&sub.get_name()) {
            snapshot_words.extend(spellings.iter().copied());
        }
        words.extend(spellings);
    }

    format!(
        r#"_{bin}() {{
    local cur=${{COMP_WORDS[COMP_CWORD]}}
    if [ "$COMP_CWORD" -eq 1 ]; then
        COMPREPLY=($(compgen -W "{words}" -- "$cur"))
    elif [ "$COMP_CWORD" -eq 2 ]; then
        case ${{COMP_WORDS[1]}} in
            {snapshot_words})
                COMPREPLY=($(compgen -W "$({bin} names 2>/dev/null)" -- "$cur"))
                ;;
        esac
    fi
}}
complete -F _{bin} {bin}
"#,
        words = words.join(" "),
        snapshot_words = snapshot_words.join("|"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Arg;

    fn cli() -> Command {
        Command::new("ds")
            .subcommand(Command::new("ls").visible_alias("list"))
            .subcommand(
                Command::new("delete")
                    .visible_aliases(["d", "rm"])
                    .arg(Arg::new("name")),
            )
            .subcommand(Command::new("restore").arg(Arg::new("name")))
            .subcommand(Command::new("names").hide(true))
    }

    #[test]
    fn test_script_completes_subcommands_and_aliases() {
        let script = bash_script(&cli());
        assert!(script.contains(r#"compgen -W "ls list delete d rm restore" -- "$cur""#));
        assert!(script.ends_with("complete -F _ds ds\n"));
    }

    #[test]
    fn test_script_completes_snapshot_names_for_delete_and_restore() {
        let script = bash_script(&cli());
        assert!(script.contains("delete|d|rm|restore)"));
        assert!(script.contains(r#"$(ds names 2>/dev/null)"#));
    }
}
