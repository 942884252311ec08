use crate::hub::Hub;
use crate::target_expand;
use crate::transfer_ops::{push_import, send_export_request};
use rc_types::models::{CommandKind, DeferredCommand, UserStatus};
use rc_types::target::substitute_user_placeholder;
use rc_types::Target;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

type ConsoleLines = Lines<BufReader<Stdin>>;

const HELP_TEXT: &str = "\n\
================================================================================\n\
AVAILABLE COMMANDS:\n\
  CMD <client|all> <command>                    - run a shell command\n\
  export <client|all> <client-path> [dir]       - pull files from a client\n\
  import <client|all> <server-path> [dir]       - push files to a client\n\
  save <client> <name>                          - save a client's last result\n\
  simpl <client|all>                            - run the command script line by line\n\
\n\
  chart_new                                     - create a deferred command\n\
  chart_list                                    - list pending deferred commands\n\
  chart_del <index>                             - delete a pending deferred command\n\
  chart_comd                                    - list completed deferred commands\n\
\n\
  group_new <name>                              - create a group\n\
  group_list                                    - list groups\n\
  group_del <name>                              - delete a group\n\
\n\
  list                                          - list known users\n\
  status                                        - list in-flight commands\n\
  cancel <client>                               - cancel a client's in-flight command\n\
  kick <client|all>                             - disconnect a client or everyone\n\
  help                                          - show this text\n\
  EXIT                                          - stop the hub\n\
================================================================================\n";

/// Runs the operator console (C8) until the operator types `EXIT` or stdin
/// closes. The hub's `tokio::select!` in `main` treats either as the signal
/// to begin a graceful shutdown.
pub async fn run_console(hub: Arc<Hub>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print_prompt();
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("console stdin closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "console read error, stopping console");
                return;
            }
        };

        let msg = line.trim();
        if msg.is_empty() {
            continue;
        }
        if msg == "EXIT" {
            println!("\nStopping the hub...");
            return;
        }

        dispatch(&hub, msg, &mut lines).await;
    }
}

fn print_prompt() {
    print!("Server> ");
    let _ = std::io::stdout().flush();
}

async fn read_line(lines: &mut ConsoleLines) -> Option<String> {
    lines.next_line().await.ok().flatten()
}

async fn prompt(lines: &mut ConsoleLines, label: &str) -> Option<String> {
    print!("{label}");
    let _ = std::io::stdout().flush();
    read_line(lines).await
}

/// Resolves an alias to its underlying agent id; passes raw ids through
/// unchanged, matching the console grammar's willingness to accept either.
async fn resolve_id(hub: &Hub, raw: &str) -> String {
    hub.users.by_alias(raw).unwrap_or_else(|| raw.to_string())
}

/// Expands `all`, `group:<name>`, or a single alias/id into the subset of
/// agent ids that are *currently connected*. Each id gets its own monitor
/// registration downstream, so "all" fans out as N individual dispatches
/// rather than one synthetic target.
async fn live_targets(hub: &Hub, target: &str) -> Vec<String> {
    if target == "all" {
        return hub.live.ids().await;
    }
    if let Some(group) = target.strip_prefix("group:") {
        let members = hub.groups.members(group).unwrap_or_default();
        let mut live = Vec::new();
        for member in members {
            let id = resolve_id(hub, &member).await;
            if hub.live.contains(&id).await {
                live.push(id);
            }
        }
        return live;
    }
    let id = resolve_id(hub, target).await;
    if hub.live.contains(&id).await {
        vec![id]
    } else {
        Vec::new()
    }
}

async fn dispatch(hub: &Arc<Hub>, msg: &str, lines: &mut ConsoleLines) {
    if let Some(rest) = msg.strip_prefix("CMD ") {
        let mut parts = rest.splitn(2, ' ');
        let target = parts.next().unwrap_or_default();
        let command = parts.next().unwrap_or_default();
        if target.is_empty() || command.is_empty() {
            println!("Usage: CMD <client|all> <command>");
            return;
        }
        cmd_dispatch(hub, target, command).await;
        return;
    }

    if let Some(rest) = msg.strip_prefix("export ") {
        let parts: Vec<&str> = rest.splitn(3, ' ').collect();
        if parts.len() < 2 {
            println!("Usage: export <client|all> <client-path> [server-dir]");
            return;
        }
        let dest_dir = parts.get(2).copied().unwrap_or("received");
        export_dispatch(hub, parts[0], parts[1], dest_dir).await;
        return;
    }

    if let Some(rest) = msg.strip_prefix("import ") {
        let parts: Vec<&str> = rest.splitn(3, ' ').collect();
        if parts.len() < 2 {
            println!("Usage: import <client|all> <server-path> [client-dir]");
            return;
        }
        let dest_dir = parts.get(2).copied().unwrap_or("received");
        import_dispatch(hub, parts[0], parts[1], dest_dir).await;
        return;
    }

    if let Some(rest) = msg.strip_prefix("save ") {
        let mut parts = rest.splitn(2, ' ');
        let target = parts.next().unwrap_or_default();
        let filename = parts.next().unwrap_or_default().trim();
        if target.is_empty() || filename.is_empty() {
            println!("Usage: save <client> <name>");
            return;
        }
        save_dispatch(hub, target, filename).await;
        return;
    }

    if let Some(rest) = msg.strip_prefix("simpl ") {
        let target = rest.trim();
        if target.is_empty() {
            println!("Usage: simpl <client|all>");
            return;
        }
        simpl_dispatch(hub, target).await;
        return;
    }

    if let Some(rest) = msg.strip_prefix("kick ") {
        let target = rest.trim();
        if target.is_empty() {
            println!("Usage: kick <client|all>");
            return;
        }
        kick_dispatch(hub, target).await;
        return;
    }

    if let Some(rest) = msg.strip_prefix("cancel ") {
        let target = rest.trim();
        if target.is_empty() {
            println!("Usage: cancel <client>");
            return;
        }
        cancel_dispatch(hub, target).await;
        return;
    }

    if msg == "list" {
        list_dispatch(hub).await;
        return;
    }

    if msg == "status" {
        status_dispatch(hub).await;
        return;
    }

    if msg == "help" {
        print!("{HELP_TEXT}");
        return;
    }

    if let Some(rest) = msg.strip_prefix("group_new ") {
        let name = rest.trim();
        if name.is_empty() {
            println!("Usage: group_new <name>");
            return;
        }
        group_new_dispatch(hub, name, lines).await;
        return;
    }

    if msg == "group_list" {
        group_list_dispatch(hub);
        return;
    }

    if let Some(rest) = msg.strip_prefix("group_del ") {
        let name = rest.trim();
        if name.is_empty() {
            println!("Usage: group_del <name>");
            return;
        }
        match hub.groups.delete(name) {
            Ok(true) => println!("Group '{name}' deleted"),
            Ok(false) => println!("Group '{name}' not found"),
            Err(e) => println!("Failed to delete group: {e}"),
        }
        return;
    }

    if msg == "chart_new" {
        chart_new_dispatch(hub, lines).await;
        return;
    }

    if msg == "chart_list" {
        chart_list_dispatch(hub);
        return;
    }

    if msg == "chart_comd" {
        chart_comd_dispatch(hub);
        return;
    }

    if let Some(rest) = msg.strip_prefix("chart_del ") {
        match rest.trim().parse::<usize>() {
            Ok(index) => match hub.deferred.remove_active(index) {
                Ok(Some(_)) => println!("Command [{index}] deleted"),
                Ok(None) => println!("Invalid index: {index}"),
                Err(e) => println!("Failed to delete: {e}"),
            },
            Err(_) => println!("Usage: chart_del <index>"),
        }
        return;
    }

    // Anything unrecognized is broadcast verbatim to every connected agent,
    // mirroring the console's fallback behavior.
    hub.live.broadcast_line(&format!("Server: {msg}")).await;
}

async fn cmd_dispatch(hub: &Hub, target: &str, command: &str) {
    let ids = live_targets(hub, target).await;
    if ids.is_empty() {
        println!("{target} is not connected");
        return;
    }
    for id in &ids {
        let Some(writer) = hub.live.get(id).await else { continue };
        let substituted = substitute_user_placeholder(command, id);
        hub.monitor.register(id, CommandKind::Cmd, substituted.clone(), 1).await;
        if let Err(e) = writer.write_line(&format!("CMD:{substituted}")).await {
            warn!(agent = %id, error = %e, "failed to dispatch CMD");
            hub.monitor.unregister(id).await;
        }
    }
    println!("Command sent to {} client(s)", ids.len());
}

async fn export_dispatch(hub: &Hub, target: &str, source_path: &str, dest_dir: &str) {
    let ids = live_targets(hub, target).await;
    if ids.is_empty() {
        println!("{target} is not connected");
        return;
    }
    for id in &ids {
        let Some(writer) = hub.live.get(id).await else { continue };
        let source = substitute_user_placeholder(source_path, id);
        hub.monitor.register(id, CommandKind::Export, format!("export {source}"), 1).await;
        if let Err(e) = send_export_request(&writer, &source, dest_dir).await {
            warn!(agent = %id, error = %e, "failed to request export");
            hub.monitor.unregister(id).await;
        }
    }
    println!("Export requested from {} client(s)", ids.len());
}

async fn import_dispatch(hub: &Hub, target: &str, source_path: &str, dest_dir: &str) {
    let ids = live_targets(hub, target).await;
    if ids.is_empty() {
        println!("{target} is not connected");
        return;
    }
    let mut sent = 0u32;
    for id in &ids {
        let Some(writer) = hub.live.get(id).await else { continue };
        let source = substitute_user_placeholder(source_path, id);
        let dest = substitute_user_placeholder(dest_dir, id);
        hub.monitor.register(id, CommandKind::Import, format!("import {source}"), 1).await;
        let outcome = push_import(&writer, &source, &dest).await;
        hub.monitor.unregister(id).await;
        match outcome {
            Ok(()) => sent += 1,
            Err(e) => warn!(agent = %id, error = %e, "import push failed"),
        }
    }
    println!("Files pushed to {sent} client(s)");
}

async fn save_dispatch(hub: &Hub, target: &str, filename: &str) {
    let id = resolve_id(hub, target).await;
    if !hub.live.contains(&id).await {
        println!("{target} is not connected");
        return;
    }
    let Some(last) = hub.last_output.get(&id).await else {
        println!("No saved output for {target}");
        return;
    };
    let path = hub.config.save_dir().join(format!("{filename}.txt"));
    let kind_label = kind_label(last.kind);
    let body = format!(
        "User: {id}\nTime: {}\nKind: {kind_label}\n{sep}\n{}\n",
        last.timestamp.to_rfc3339(),
        last.content,
        sep = "=".repeat(50),
    );
    match std::fs::write(&path, body) {
        Ok(()) => println!("Saved to {}", path.display()),
        Err(e) => println!("Failed to save: {e}"),
    }
}

async fn simpl_dispatch(hub: &Hub, target: &str) {
    let commands = match std::fs::read_to_string(hub.config.simpl_script_path()) {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>(),
        Err(e) => {
            println!("Could not read the command script: {e}");
            return;
        }
    };
    if commands.is_empty() {
        println!("The command script is empty");
        return;
    }

    let ids = live_targets(hub, target).await;
    if ids.is_empty() {
        println!("{target} is not connected");
        return;
    }

    for id in &ids {
        let Some(writer) = hub.live.get(id).await else { continue };
        hub.monitor
            .register(id, CommandKind::Simpl, format!("simpl ({} commands)", commands.len()), commands.len() as u32)
            .await;
        for line in &commands {
            let line = substitute_user_placeholder(line, id);
            if writer.write_line(&format!("FILETRU:{line}")).await.is_err() {
                hub.monitor.unregister(id).await;
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
    println!("Sent {} commands to {} client(s)", commands.len(), ids.len());
}

async fn kick_dispatch(hub: &Hub, target: &str) {
    let ids = live_targets(hub, target).await;
    if ids.is_empty() {
        println!("{target} is not connected");
        return;
    }
    let mut kicked = 0u32;
    for id in &ids {
        if let Some(writer) = hub.live.get(id).await {
            if writer.write_line("KICK:Disconnected by the operator").await.is_ok() {
                kicked += 1;
            }
        }
    }
    println!("Kicked {kicked} client(s)");
}

async fn cancel_dispatch(hub: &Hub, target: &str) {
    let id = resolve_id(hub, target).await;
    if !hub.monitor.is_registered(&id).await {
        println!("{target} has no active command");
        return;
    }
    if let Some(writer) = hub.live.get(&id).await {
        let _ = writer.write_line("CMD:CANCEL_MANUAL").await;
    }
    hub.monitor.unregister(&id).await;
    hub.monitor.clear_deferred_pending(&id).await;
    println!("Cancelled the command running on {target}");
}

async fn list_dispatch(hub: &Hub) {
    let rows = hub
        .users
        .with_state(|state| state.users.iter().map(|(id, record)| (id.clone(), record.clone())).collect::<Vec<_>>());

    if rows.is_empty() {
        println!("No registered users");
        return;
    }

    println!("\n{}", "=".repeat(80));
    println!("{:<4} {:<20} {:<20} {:<8} {:<20}", "#", "Username", "Alias", "Status", "Time");
    println!("{}", "=".repeat(80));

    let mut online = 0;
    for (i, (id, record)) in rows.iter().enumerate() {
        let status_label = match record.status {
            UserStatus::On => {
                online += 1;
                "ON"
            }
            UserStatus::Off => "OFF",
        };
        let time = match record.status {
            UserStatus::On => record.last_login,
            UserStatus::Off => record.last_logout,
        }
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
        println!("{:<4} {:<20} {:<20} {:<8} {:<20}", i + 1, id, record.alias, status_label, time);
    }
    println!("{}", "=".repeat(80));
    println!("Total: {} | Online: {online}\n", rows.len());
}

async fn status_dispatch(hub: &Hub) {
    let active = hub.monitor.active_snapshot().await;
    if active.is_empty() {
        println!("No active commands");
        return;
    }
    println!("\n{}\nACTIVE COMMANDS\n{}", "=".repeat(80), "=".repeat(80));
    let now = chrono::Utc::now();
    for (id, cmd) in &active {
        let elapsed = now.signed_duration_since(cmd.start_time).num_milliseconds() as f64 / 1000.0;
        println!("{id}: {} ({elapsed:.1}s) - {}", kind_label(cmd.kind), cmd.command_text);
    }
    println!("{}\n", "=".repeat(80));
}

async fn group_new_dispatch(hub: &Hub, name: &str, lines: &mut ConsoleLines) {
    if hub.groups.members(name).is_some() {
        println!("Group '{name}' already exists");
        return;
    }

    println!("\nCreating group '{name}'");
    println!("Enter member usernames one at a time. Type EXIT to finish.");

    let mut members = Vec::new();
    loop {
        print!("  > ");
        let _ = std::io::stdout().flush();
        let Some(line) = read_line(lines).await else { break };
        let member = line.trim();
        if member == "EXIT" {
            break;
        }
        if !member.is_empty() {
            members.push(member.to_string());
            println!("  + {member}");
        }
    }

    if members.is_empty() {
        println!("Group not created (no members)");
        return;
    }

    let count = members.len();
    match hub.groups.create(name, members) {
        Ok(true) => println!("Group '{name}' created with {count} members"),
        Ok(false) => println!("Group '{name}' already exists"),
        Err(e) => println!("Failed to create group: {e}"),
    }
}

fn group_list_dispatch(hub: &Hub) {
    let groups = hub.groups.all();
    if groups.is_empty() {
        println!("No groups");
        return;
    }
    println!("\n{}", "=".repeat(60));
    println!("GROUPS:");
    println!("{}", "=".repeat(60));
    for (name, members) in &groups {
        println!("{name} ({} members)", members.len());
        for member in members {
            println!("   - {member}");
        }
        println!();
    }
    println!("{}\n", "=".repeat(60));
}

async fn chart_new_dispatch(hub: &Hub, lines: &mut ConsoleLines) {
    println!("\n{}", "=".repeat(60));
    println!("CREATE A DEFERRED COMMAND");
    println!("{}", "=".repeat(60));

    let Some(target_raw) = prompt(lines, "Target (all/username/group:name): ").await else {
        return;
    };
    let target_raw = target_raw.trim().to_string();
    if target_raw.is_empty() {
        println!("Target cannot be empty");
        return;
    }
    if let Some(group) = target_raw.strip_prefix("group:") {
        if hub.groups.members(group).is_none() {
            println!("Group '{group}' does not exist");
            return;
        }
    }

    let Some(kind_raw) = prompt(lines, "Kind (CMD/SIMPL/IMPORT/EXPORT): ").await else {
        return;
    };
    let kind = match kind_raw.trim().to_uppercase().as_str() {
        "CMD" => CommandKind::Cmd,
        "SIMPL" => CommandKind::Simpl,
        "IMPORT" => CommandKind::Import,
        "EXPORT" => CommandKind::Export,
        _ => {
            println!("Invalid command kind");
            return;
        }
    };

    let target = Target::parse(&target_raw);
    let expanded = target_expand::expand(&target, &hub.users, &hub.groups);

    let (command, source_path, dest_path) = match kind {
        CommandKind::Cmd => {
            let Some(command) = prompt(lines, "Command: ").await else { return };
            let command = command.trim().to_string();
            if command.is_empty() {
                println!("Command cannot be empty");
                return;
            }
            (Some(command), None, None)
        }
        CommandKind::Simpl => {
            println!("Commands from the script file will be executed");
            if !hub.config.simpl_script_path().exists() {
                println!("{} not found", hub.config.simpl_script_path().display());
                return;
            }
            (None, None, None)
        }
        CommandKind::Import => {
            let Some(source) = prompt(lines, "Server path: ").await else { return };
            let Some(dest) = prompt(lines, "Client path: ").await else { return };
            let (source, dest) = (source.trim().to_string(), dest.trim().to_string());
            if source.is_empty() || dest.is_empty() {
                println!("Both paths are required");
                return;
            }
            (None, Some(source), Some(dest))
        }
        CommandKind::Export => {
            let Some(source) = prompt(lines, "Client path: ").await else { return };
            let Some(dest) = prompt(lines, "Server path [received]: ").await else { return };
            let source = source.trim().to_string();
            let dest = {
                let d = dest.trim();
                if d.is_empty() { "received".to_string() } else { d.to_string() }
            };
            if source.is_empty() {
                println!("The client path is required");
                return;
            }
            (None, Some(source), Some(dest))
        }
    };

    match hub.deferred.add(target, kind, command, source_path, dest_path, expanded.clone()) {
        Ok(_) => {
            println!("Command added for '{target_raw}'");
            println!("Waiting on {} user(s)", expanded.len());
        }
        Err(e) => println!("Failed to add the command: {e}"),
    }
}

fn chart_list_dispatch(hub: &Hub) {
    let commands = hub.deferred.all_active();
    if commands.is_empty() {
        println!("No active deferred commands");
        return;
    }
    println!("\n{}", "=".repeat(60));
    println!("ACTIVE DEFERRED COMMANDS:");
    println!("{}", "=".repeat(60));
    for (i, cmd) in commands.iter().enumerate() {
        print_chart_line(i, cmd);
        if !cmd.completed_users.is_empty() {
            println!("    done: {}", cmd.completed_users.len());
        }
        if !cmd.expected_users.is_empty() {
            println!("    waiting: {}", cmd.expected_users.len());
        }
    }
    println!("{}\n", "=".repeat(60));
}

fn chart_comd_dispatch(hub: &Hub) {
    let completed = hub.deferred.all_completed();
    let active = hub.deferred.all_active();
    if completed.is_empty() && active.iter().all(|c| c.completed_users.is_empty()) {
        println!("No completed commands");
        return;
    }

    println!("\n{}", "=".repeat(70));
    println!("COMPLETED COMMANDS: {}", completed.len());
    println!("{}", "=".repeat(70));
    for (i, cmd) in completed.iter().enumerate() {
        let finished_at = cmd.completed_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "unknown".into());
        println!();
        print_chart_line(i, cmd);
        println!("    ({finished_at}) done");
        for user in &cmd.completed_users {
            println!("    - {user} done");
        }
    }

    println!("\n{}", "=".repeat(70));
    println!("IN PROGRESS:");
    println!("{}", "=".repeat(70));
    for (i, cmd) in active.iter().enumerate() {
        if cmd.completed_users.is_empty() {
            continue;
        }
        println!();
        print_chart_line(i, cmd);
        for user in &cmd.completed_users {
            println!("    - {user} done");
        }
        if !cmd.expected_users.is_empty() {
            println!("    waiting on {} more", cmd.expected_users.len());
        }
    }
    println!("{}\n", "=".repeat(70));
}

fn print_chart_line(i: usize, cmd: &DeferredCommand) {
    match cmd.kind {
        CommandKind::Cmd => println!("[{i}] {} -> CMD: {}", cmd.target, cmd.command.as_deref().unwrap_or("")),
        CommandKind::Simpl => println!("[{i}] {} -> SIMPL (command script)", cmd.target),
        CommandKind::Import | CommandKind::Export => println!(
            "[{i}] {} -> {}: {} -> {}",
            cmd.target,
            kind_label(cmd.kind),
            cmd.source_path.as_deref().unwrap_or(""),
            cmd.dest_path.as_deref().unwrap_or(""),
        ),
    }
}

fn kind_label(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Cmd => "CMD",
        CommandKind::Simpl => "SIMPL",
        CommandKind::Import => "IMPORT",
        CommandKind::Export => "EXPORT",
    }
}
