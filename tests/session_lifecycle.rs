//! Session lifecycle integration tests
//!
//! Exercises session creation, hash-stable reload, PRD-change handling, and
//! batched status flushes against real plan directories.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use prp_engine::models::{Milestone, Phase, Subtask, Task};
use prp_engine::{Backlog, ItemStatus, SessionManager, WorkItem};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn prd_body(seed: &str) -> String {
    format!(
        "# Orchestrated Project\n\n## Phase 1\n\nSeed: {}\n\n{}",
        seed,
        "The system shall persist sessions keyed by PRD hash. ".repeat(4)
    )
}

fn write_prd(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn subtask(id: &str) -> WorkItem {
    WorkItem::Subtask(Subtask {
        id: id.to_string(),
        title: format!("Subtask {}", id),
        status: ItemStatus::Planned,
        description: String::new(),
        story_points: 1,
        dependencies: vec![],
        context_scope: String::new(),
    })
}

fn three_subtask_backlog() -> Backlog {
    Backlog::new(vec![WorkItem::Phase(Phase {
        id: "P1".into(),
        title: "Core".into(),
        status: ItemStatus::Planned,
        description: String::new(),
        milestones: vec![WorkItem::Milestone(Milestone {
            id: "P1.M1".into(),
            title: "Foundations".into(),
            status: ItemStatus::Planned,
            description: String::new(),
            tasks: vec![WorkItem::Task(Task {
                id: "P1.M1.T1".into(),
                title: "Store".into(),
                status: ItemStatus::Planned,
                description: String::new(),
                subtasks: vec![
                    subtask("P1.M1.T1.S1"),
                    subtask("P1.M1.T1.S2"),
                    subtask("P1.M1.T1.S3"),
                ],
            })],
        })],
    })])
}

#[test]
fn new_session_creates_expected_layout() -> anyhow::Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let prd_bytes = prd_body("layout");
    let prd = write_prd(dir.path(), "prd.md", &prd_bytes);
    let plan = dir.path().join("plan");

    let mut manager = SessionManager::new(&prd, &plan);
    let state = manager.initialize()?;

    // Exactly one session directory, named 001_<hash12>
    let name_re = Regex::new(r"^001_[0-9a-f]{12}$")?;
    let entries: Vec<String> = fs::read_dir(&plan)?
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries.len(), 1);
    assert!(name_re.is_match(&entries[0]));

    // Snapshot holds the exact PRD bytes
    let session_dir = plan.join(&entries[0]);
    assert_eq!(
        fs::read(session_dir.join("prd_snapshot.md"))?,
        prd_bytes.as_bytes()
    );

    // Hash is the first 12 hex characters of SHA-256 over the PRD bytes
    let digest = Sha256::digest(prd_bytes.as_bytes());
    let expected: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    assert_eq!(state.metadata.hash, expected[..12]);
    assert!(state.metadata.parent_session.is_none());
    assert!(state.task_registry.is_empty());

    // Workspace subdirectories exist
    for sub in ["architecture", "prps", "artifacts"] {
        assert!(session_dir.join(sub).is_dir());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&session_dir.join("prd_snapshot.md")), 0o644);
        assert_eq!(mode(&session_dir.join("tasks.json")), 0o644);
        for sub in ["architecture", "prps", "artifacts"] {
            assert_eq!(mode(&session_dir.join(sub)), 0o755);
        }
    }
    Ok(())
}

#[test]
fn identical_prd_bytes_reload_same_session() -> anyhow::Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let body = prd_body("stable");
    let prd_a = write_prd(dir.path(), "prd_a.md", &body);
    let copies = dir.path().join("copies");
    fs::create_dir_all(&copies)?;
    let prd_b = write_prd(&copies, "prd_b.md", &body);
    let plan = dir.path().join("plan");

    let id_a = SessionManager::new(&prd_a, &plan)
        .initialize()?
        .metadata
        .id
        .clone();
    let id_b = SessionManager::new(&prd_b, &plan)
        .initialize()?
        .metadata
        .id
        .clone();

    assert_eq!(id_a, id_b);
    assert_eq!(fs::read_dir(&plan)?.count(), 1);
    Ok(())
}

#[test]
fn changed_prd_yields_second_session() -> anyhow::Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let original = prd_body("delta");
    let prd = write_prd(dir.path(), "prd.md", &original);
    let plan = dir.path().join("plan");

    SessionManager::new(&prd, &plan).initialize()?;

    // Single-character change re-keys the session
    let mut changed = original.clone();
    changed.push('!');
    fs::write(&prd, &changed)?;
    SessionManager::new(&prd, &plan).initialize()?;

    let mut sessions = prp_engine::list_sessions(&plan)?;
    sessions.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(sessions.len(), 2);
    assert!(sessions[0].id.starts_with("001_"));
    assert!(sessions[1].id.starts_with("002_"));
    assert_ne!(sessions[0].hash, sessions[1].hash);

    // Each snapshot preserves its own revision
    assert_eq!(
        fs::read(sessions[0].path.join("prd_snapshot.md"))?,
        original.as_bytes()
    );
    assert_eq!(
        fs::read(sessions[1].path.join("prd_snapshot.md"))?,
        changed.as_bytes()
    );
    Ok(())
}

#[test]
fn flush_coalesces_batched_updates() -> anyhow::Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let prd = write_prd(dir.path(), "prd.md", &prd_body("flush"));
    let plan = dir.path().join("plan");

    let mut manager = SessionManager::new(&prd, &plan);
    manager.initialize()?;
    manager.set_task_registry(three_subtask_backlog())?;
    manager.flush_updates()?;

    let tasks_path = manager
        .session()
        .unwrap()
        .metadata
        .path
        .join("tasks.json");
    let before = fs::read_to_string(&tasks_path)?;

    manager.update_item_status("P1.M1.T1.S1", ItemStatus::Complete)?;
    manager.update_item_status("P1.M1.T1.S2", ItemStatus::Failed)?;
    manager.update_item_status("P1.M1.T1.S3", ItemStatus::Implementing)?;

    // Disk is untouched while updates are buffered
    assert_eq!(fs::read_to_string(&tasks_path)?, before);

    manager.flush_updates()?;
    let on_disk: Backlog = serde_json::from_str(&fs::read_to_string(&tasks_path)?)?;
    assert_eq!(&on_disk, &manager.session().unwrap().task_registry);

    let status_of = |id: &str| {
        prp_engine::find_item(&on_disk, id)
            .map(|item| item.status())
            .unwrap()
    };
    assert_eq!(status_of("P1.M1.T1.S1"), ItemStatus::Complete);
    assert_eq!(status_of("P1.M1.T1.S2"), ItemStatus::Failed);
    assert_eq!(status_of("P1.M1.T1.S3"), ItemStatus::Implementing);

    // No temp siblings survive a flush
    let leftovers = fs::read_dir(tasks_path.parent().unwrap())?
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".tmp")
        })
        .count();
    assert_eq!(leftovers, 0);
    Ok(())
}

#[test]
fn status_update_touches_exactly_one_node() -> anyhow::Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let prd = write_prd(dir.path(), "prd.md", &prd_body("one-node"));
    let plan = dir.path().join("plan");

    let mut manager = SessionManager::new(&prd, &plan);
    manager.initialize()?;
    manager.set_task_registry(three_subtask_backlog())?;

    manager.update_item_status("P1.M1", ItemStatus::Implementing)?;
    let registry = &manager.session().unwrap().task_registry;
    assert_eq!(
        prp_engine::find_item(registry, "P1.M1").unwrap().status(),
        ItemStatus::Implementing
    );
    // Parent and all descendants stay Planned
    assert_eq!(
        prp_engine::find_item(registry, "P1").unwrap().status(),
        ItemStatus::Planned
    );
    for id in ["P1.M1.T1", "P1.M1.T1.S1", "P1.M1.T1.S2", "P1.M1.T1.S3"] {
        assert_eq!(
            prp_engine::find_item(registry, id).unwrap().status(),
            ItemStatus::Planned
        );
    }
    Ok(())
}

#[test]
fn unknown_item_update_is_a_silent_noop() -> anyhow::Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let prd = write_prd(dir.path(), "prd.md", &prd_body("noop"));
    let plan = dir.path().join("plan");

    let mut manager = SessionManager::new(&prd, &plan);
    manager.initialize()?;
    manager.set_task_registry(three_subtask_backlog())?;
    let before = manager.session().unwrap().task_registry.clone();

    manager.update_item_status("P4.M4.T4.S4", ItemStatus::Complete)?;
    assert_eq!(manager.session().unwrap().task_registry, before);
    Ok(())
}
