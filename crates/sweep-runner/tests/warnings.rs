use std::io;
use std::sync::{Arc, Mutex};
use sweep_runner::{
    substitute, Assignment, Blob, Experiment, OutputTransform, Session, SessionConfig,
};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter(Arc::clone(&self.0))
    }
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "lock poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_warnings(f: impl FnOnce()) -> String {
    let sink = SharedBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .with_ansi(false)
        .with_max_level(Level::WARN)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = sink.0.lock().expect("lock output").clone();
    String::from_utf8(bytes).expect("utf8 log output")
}

#[test]
fn unresolved_placeholder_is_logged() {
    let args: Assignment = vec![("a", serde_json::json!("1"))].into_iter().collect();
    let mut resolved = String::new();
    let logs = capture_warnings(|| {
        resolved = substitute("[[a]]-[[missing]]", &args);
    });
    assert_eq!(resolved, "1-[[missing]]");
    assert!(logs.contains("WARN"), "{}", logs);
    assert!(
        logs.contains("No value for [[missing]] found to replace in [[a]]-[[missing]]"),
        "{}",
        logs
    );
}

#[test]
fn resolved_placeholders_log_nothing() {
    let args: Assignment = vec![("a", serde_json::json!("1"))].into_iter().collect();
    let logs = capture_warnings(|| {
        assert_eq!(Blob::from("x[[a]]").resolve(&args), "x1");
    });
    assert!(logs.is_empty(), "{}", logs);
}

#[test]
fn every_declaration_warning_is_logged() {
    let cases: Vec<(Experiment, &str)> = vec![
        (
            Experiment::new("e", "true")
                .stdout_transform(OutputTransform::text(|s| Blob::from(s.to_string()))),
            "stdout_mod has no effect if stdout_file is not specified",
        ),
        (
            Experiment::new("e", "true").stdout_res("[[stdout]]"),
            "stdout_res has no effect if stdout_file is not specified",
        ),
        (
            Experiment::new("e", "true").header_string("a,b"),
            "header_string has no effect if stdout_file is not specified",
        ),
        (
            Experiment::new("e", "true").header_command("echo a,b"),
            "header_command has no effect if stdout_file is not specified",
        ),
        (
            Experiment::new("e", "true")
                .stdout_file("never_written.txt")
                .header_string("a,b")
                .header_command("echo a,b"),
            "header_string and header_command specified - Which one should I use?",
        ),
        (
            Experiment::new("e", "true").header_transform(|h| h.to_string()),
            "header_mod has no effect if not one of header_string or header_command are specified",
        ),
    ];

    for (exp, expected) in cases {
        let mut session = Session::new(SessionConfig::default());
        let mut declared = None;
        let logs = capture_warnings(|| {
            declared = Some(session.declare(&exp));
        });
        let declared = declared.expect("declared");
        assert_eq!(declared.warnings, vec![expected.to_string()]);
        assert!(logs.contains(expected), "missing '{}' in: {}", expected, logs);
    }
}
