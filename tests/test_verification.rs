use citecheck::error::CiteError;
use citecheck::inventory::InventoryEntry;
use citecheck::latex::ManuscriptLines;
use citecheck::verification::report::{parse_judgments, render_analysis};
use citecheck::verification::{
    group_into_paragraphs, mark_attribution_units, EntryOutcome, LlmRequest, LlmService, Verifier,
};
use citecheck::{run_verification, Config};
use std::fs;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::runtime::Runtime;

#[derive(Clone)]
enum Reply {
    Text(String),
    Fail,
    /// Wait for the request timeout, then report it.
    Hang,
    /// The tool is not installed.
    Missing,
}

/// In-process LLM stand-in with one scripted reply per stage.
struct ScriptedLlm {
    marking: Reply,
    validation: Reply,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    fn new(marking: Reply, validation: Reply) -> Self {
        Self {
            marking,
            validation,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LlmService for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete<'a>(
        &'a self,
        request: LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, CiteError>> + Send + 'a>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            let reply = if request.attachments.is_empty() {
                self.marking.clone()
            } else {
                self.validation.clone()
            };
            match reply {
                Reply::Text(text) => Ok(text),
                Reply::Fail => Err(CiteError::ToolFailed {
                    tool: "scripted".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "boom".to_string(),
                }),
                Reply::Missing => Err(CiteError::ToolNotFound("scripted".to_string())),
                Reply::Hang => {
                    tokio::time::sleep(request.timeout).await;
                    Err(CiteError::Timeout {
                        tool: "scripted".to_string(),
                        after: request.timeout,
                    })
                }
            }
        })
    }
}

const MARKED: &str = "Line 10: ->Evidence shows X \\cite{foo2020}.<-";
const JUDGMENT: &str = "Line 10: ✅ The source reports X directly.";

fn project() -> (TempDir, Config) {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let mut manuscript = String::new();
    for i in 1..10 {
        manuscript.push_str(&format!("Filler {}\n", i));
    }
    manuscript.push_str("  Evidence shows X \\cite{foo2020}.\n");
    fs::write(root.join("paper.tex"), manuscript).unwrap();
    fs::create_dir(root.join("papers")).unwrap();
    fs::write(root.join("papers").join("foo.pdf"), b"%PDF").unwrap();
    fs::write(
        root.join("citation_inventory.md"),
        "READY (foo2020), (10.1/X), (foo.pdf) - 10\nMISSING_FILE (bar), (), () - 3",
    )
    .unwrap();

    let config = Config {
        paper_path: root.join("paper.tex"),
        papers_dir: root.join("papers"),
        inventory_path: root.join("citation_inventory.md"),
        analysis_path: root.join("citation_analysis.md"),
        paragraph_timeout: Duration::from_millis(200),
        validation_timeout: Duration::from_millis(200),
        ..Config::default()
    };
    (dir, config)
}

fn ready_entry() -> InventoryEntry {
    InventoryEntry::parse_line("READY (foo2020), (10.1/X), (foo.pdf) - 10").unwrap()
}

fn verifier(llm: Arc<ScriptedLlm>, config: &Config) -> Verifier {
    let manuscript = ManuscriptLines::load(&config.paper_path).unwrap();
    Verifier::new(llm, manuscript, config)
}

#[test]
fn test_run_verification_appends_analysis() {
    let (_dir, config) = project();
    let llm = Arc::new(ScriptedLlm::new(
        Reply::Text(MARKED.to_string()),
        Reply::Text(JUDGMENT.to_string()),
    ));

    let rt = Runtime::new().unwrap();
    let summary = rt.block_on(run_verification(&config, llm.clone())).unwrap();
    assert_eq!(summary.analyzed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);

    let report = fs::read_to_string(&config.analysis_path).unwrap();
    assert!(report.starts_with("## foo2020\n\n**Files:** foo.pdf\n**Lines:** 10\n"));
    assert!(report.contains("*Line 10: **Evidence shows X \\cite{foo2020}.***\n  ✅ The source reports X directly.\n"));
    assert!(report.trim_end().ends_with("---"));

    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].prompt.contains("Line 10: Evidence shows X \\cite{foo2020}."));
    assert!(requests[0].prompt.contains("(foo2020)"));
    assert_eq!(requests[1].attachments, vec![config.papers_dir.join("foo.pdf")]);
    assert!(requests[1].prompt.contains(MARKED));
}

#[test]
fn test_second_run_appends_again() {
    let (_dir, config) = project();
    let llm = Arc::new(ScriptedLlm::new(
        Reply::Text(MARKED.to_string()),
        Reply::Text(JUDGMENT.to_string()),
    ));

    let rt = Runtime::new().unwrap();
    rt.block_on(run_verification(&config, llm.clone())).unwrap();
    rt.block_on(run_verification(&config, llm)).unwrap();

    let report = fs::read_to_string(&config.analysis_path).unwrap();
    assert_eq!(report.matches("## foo2020").count(), 2);
}

#[test]
fn test_missing_tool_aborts_the_run() {
    let (_dir, config) = project();
    let llm = Arc::new(ScriptedLlm::new(Reply::Missing, Reply::Text(JUDGMENT.to_string())));

    let rt = Runtime::new().unwrap();
    let result = rt.block_on(run_verification(&config, llm.clone()));

    let err = result.unwrap_err();
    assert!(
        matches!(err.downcast_ref::<CiteError>(), Some(CiteError::ToolNotFound(_))),
        "{:?}",
        err
    );
    assert!(!config.analysis_path.exists());
    assert_eq!(llm.requests().len(), 1);
}

#[test]
fn test_stage_one_timeout_fails_entry() {
    let (_dir, config) = project();
    let llm = Arc::new(ScriptedLlm::new(Reply::Hang, Reply::Text(JUDGMENT.to_string())));
    let verifier = verifier(llm.clone(), &config);

    let rt = Runtime::new().unwrap();
    let outcome = rt.block_on(verifier.process_entry(&ready_entry())).unwrap();
    match outcome {
        EntryOutcome::Failed(reason) => assert!(reason.contains("timed out"), "{}", reason),
        other => panic!("unexpected outcome {:?}", other),
    }
    // Stage two never ran and nothing was written
    assert_eq!(llm.requests().len(), 1);
    assert!(!config.analysis_path.exists());
}

#[test]
fn test_empty_validation_output_fails_entry() {
    let (_dir, config) = project();
    let llm = Arc::new(ScriptedLlm::new(Reply::Text(MARKED.to_string()), Reply::Text("   ".to_string())));
    let verifier = verifier(llm, &config);

    let rt = Runtime::new().unwrap();
    let result = rt.block_on(verifier.verify_entry(&ready_entry()));
    assert!(matches!(result, Err(CiteError::EmptyOutput(_))));
}

#[test]
fn test_missing_source_file_fails_without_llm_calls() {
    let (_dir, config) = project();
    fs::remove_file(config.papers_dir.join("foo.pdf")).unwrap();
    let llm = Arc::new(ScriptedLlm::new(Reply::Fail, Reply::Fail));
    let verifier = verifier(llm.clone(), &config);

    let rt = Runtime::new().unwrap();
    let result = rt.block_on(verifier.verify_entry(&ready_entry()));
    assert!(matches!(result, Err(CiteError::NoValidFiles(_))));
    assert!(llm.requests().is_empty());
}

#[test]
fn test_missing_file_entries_are_skipped() {
    let (_dir, config) = project();
    let llm = Arc::new(ScriptedLlm::new(Reply::Fail, Reply::Fail));
    let verifier = verifier(llm.clone(), &config);
    let entry = InventoryEntry::parse_line("MISSING_FILE (bar), (), () - 3").unwrap();

    let rt = Runtime::new().unwrap();
    let outcome = rt.block_on(verifier.process_entry(&entry)).unwrap();
    assert!(matches!(outcome, EntryOutcome::Skipped(_)));
    assert!(llm.requests().is_empty());
}

/// Marks a flag when dropped, so cancellation is observable.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// The first paragraph fails shortly; every other paragraph blocks until cancelled.
struct FailFast {
    dropped: Arc<AtomicBool>,
}

impl LlmService for FailFast {
    fn name(&self) -> &str {
        "fail-fast"
    }

    fn complete<'a>(
        &'a self,
        request: LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, CiteError>> + Send + 'a>> {
        let dropped = Arc::clone(&self.dropped);
        Box::pin(async move {
            if request.prompt.contains("Line 1:") {
                // Give the other request time to start
                tokio::time::sleep(Duration::from_millis(100)).await;
                return Err(CiteError::EmptyOutput("fail-fast".to_string()));
            }
            let _flag = DropFlag(dropped);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        })
    }
}

#[test]
fn test_first_failure_cancels_other_paragraphs() {
    let dropped = Arc::new(AtomicBool::new(false));
    let llm = Arc::new(FailFast {
        dropped: Arc::clone(&dropped),
    });
    let lines = vec![(1, "first".to_string()), (5, "second".to_string())];
    let paragraphs = group_into_paragraphs(&lines);
    assert_eq!(paragraphs.len(), 2);

    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let started = std::time::Instant::now();
        let result =
            mark_attribution_units(llm, &paragraphs, &["k".to_string()], Duration::from_secs(60)).await;
        assert!(matches!(result, Err(CiteError::EmptyOutput(_))));
        assert!(started.elapsed() < Duration::from_secs(30));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(dropped.load(Ordering::SeqCst));
    });
}

#[test]
fn test_marked_paragraphs_keep_input_order() {
    struct Echo;
    impl LlmService for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn complete<'a>(
            &'a self,
            request: LlmRequest,
        ) -> Pin<Box<dyn Future<Output = Result<String, CiteError>> + Send + 'a>> {
            Box::pin(async move {
                // Earlier paragraphs answer later
                let delay = if request.prompt.contains("Line 1:") { 50 } else { 0 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let start = request.prompt.find("<<").unwrap() + 2;
                Ok(request.prompt[start..].trim_end_matches(">>").to_string())
            })
        }
    }

    let lines = vec![(1, "one".to_string()), (3, "three".to_string()), (9, "nine".to_string())];
    let paragraphs = group_into_paragraphs(&lines);
    let rt = Runtime::new().unwrap();
    let marked = rt
        .block_on(mark_attribution_units(Arc::new(Echo), &paragraphs, &["k".to_string()], Duration::from_secs(5)))
        .unwrap();
    assert_eq!(marked, vec!["Line 1: one\n", "Line 3: three\n", "Line 9: nine\n"]);
}

#[test]
fn test_render_analysis_layout() {
    let entry = InventoryEntry::parse_line("READY (a,b), (), (a.pdf,b.pdf) - 4,5").unwrap();
    let marked = vec!["Line 4: ->Claim one.<- Other.\nLine 5: Tail ->two<-.".to_string()];
    let analysis = "Line 4: ✅ fine\nnoise\nLine 5: ❌ unsupported";

    let judgments = parse_judgments(analysis);
    assert_eq!(judgments.len(), 2);

    let rendered = render_analysis(&entry, &marked, analysis);
    assert_eq!(
        rendered,
        "## a, b\n\n**Files:** a.pdf, b.pdf\n**Lines:** 4, 5\n\n\
*Line 4: **Claim one.** Other.*\n  ✅ fine\n\n\
*Line 5: Tail **two**.*\n  ❌ unsupported\n\n\n\
---\n\n"
    );
}

#[cfg(unix)]
#[test]
fn test_claude_cli_stand_in_script() {
    use citecheck::verification::ClaudeCli;
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let script = dir.path().join("fake-claude");
    fs::write(&script, "#!/bin/sh\necho \"args: $*\"\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let cli = ClaudeCli::new(script.to_string_lossy());
    let request = LlmRequest::new("hello", Duration::from_secs(5))
        .with_model("haiku")
        .with_attachments(vec![Path::new("/tmp/a.pdf").to_path_buf()]);

    let rt = Runtime::new().unwrap();
    let output = rt.block_on(cli.complete(request)).unwrap();
    assert_eq!(output, "args: --model haiku -p hello /tmp/a.pdf");
}

#[cfg(unix)]
#[test]
fn test_claude_cli_timeout_and_missing_tool() {
    use citecheck::verification::ClaudeCli;
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let script = dir.path().join("slow-claude");
    fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let rt = Runtime::new().unwrap();
    let slow = ClaudeCli::new(script.to_string_lossy());
    let result = rt.block_on(slow.complete(LlmRequest::new("x", Duration::from_millis(200))));
    assert!(matches!(result, Err(CiteError::Timeout { .. })));

    let missing = ClaudeCli::new(dir.path().join("does-not-exist").to_string_lossy());
    let result = rt.block_on(missing.complete(LlmRequest::new("x", Duration::from_secs(1))));
    assert!(matches!(result, Err(CiteError::ToolNotFound(_))));
}
