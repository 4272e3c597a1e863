mod common;
use common::*;
use std::process::Command;

fn answer() -> kiln::ast::Program {
    main_only(vec![println(string("hi")), ret(int(42))])
}

#[test]
fn build_and_run_each_backend() {
    if !cc_available() {
        return;
    }
    for backend in ["ir", "c"] {
        let dir = tempfile::tempdir().unwrap();
        let src = write_program(dir.path(), &answer());
        let exe = dir.path().join("answer");
        let output = kilnc()
            .args(["build", src.to_str().unwrap(), "-o", exe.to_str().unwrap(), "--backend", backend])
            .output()
            .unwrap();
        assert!(output.status.success(), "{backend}: {}", String::from_utf8_lossy(&output.stderr));

        let run = Command::new(&exe).output().unwrap();
        assert_eq!(run.status.code(), Some(42));
        assert_eq!(String::from_utf8_lossy(&run.stdout), "hi\n");
    }
}

#[test]
fn run_forwards_exit_status() {
    if !cc_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let src = write_program(dir.path(), &answer());
    let output = kilnc().args(["run", src.to_str().unwrap()]).output().unwrap();
    assert_eq!(output.status.code(), Some(42));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hi\n");
}

#[test]
fn emit_c_to_stdout_and_file() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_program(dir.path(), &answer());
    let output = kilnc().args(["emit-c", src.to_str().unwrap()]).output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("#include \"kiln_runtime.h\""), "{text}");
    assert!(text.contains("int main(void)"), "{text}");

    let out_c = dir.path().join("out.c");
    let output = kilnc().args(["emit-c", src.to_str().unwrap(), "-o", out_c.to_str().unwrap()]).output().unwrap();
    assert!(output.status.success());
    assert_eq!(std::fs::read_to_string(out_c).unwrap(), text);
}

#[test]
fn emit_ir_prints_functions() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_program(dir.path(), &answer());
    let output = kilnc().args(["emit-ir", src.to_str().unwrap()]).output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("; kiln: main"), "{text}");
}

#[test]
fn emit_obj_writes_object() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_program(dir.path(), &answer());
    let obj = dir.path().join("answer.o");
    let output = kilnc().args(["emit-obj", src.to_str().unwrap(), "-o", obj.to_str().unwrap()]).output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(std::fs::metadata(&obj).unwrap().len() > 0);
}

#[test]
fn check_succeeds_on_valid_program() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_program(dir.path(), &answer());
    let output = kilnc().args(["check", src.to_str().unwrap()]).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ok (1 function(s))"));
}

#[test]
fn check_fails_with_rendered_error() {
    let dir = tempfile::tempdir().unwrap();
    let prog = main_only(vec![ret(call("nowhere", vec![], KilnType::Int))]);
    let src = write_program(dir.path(), &prog);
    let output = kilnc().args(["check", src.to_str().unwrap()]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[undefined-function]: undefined function 'nowhere'"), "{stderr}");
}

#[test]
fn malformed_json_is_an_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("broken.json");
    std::fs::write(&src, "{ \"functions\": [").unwrap();
    let output = kilnc().args(["check", src.to_str().unwrap()]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error[input]"));
}

#[test]
fn missing_program_file() {
    let output = kilnc().args(["check", "/definitely/not/here.json"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read"));
}

#[test]
fn config_file_selects_backend() {
    if !cc_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let src = write_program(dir.path(), &answer());
    std::fs::write(dir.path().join("kiln.toml"), "[build]\nbackend = \"c\"\nopt_level = \"speed\"\n").unwrap();
    let exe = dir.path().join("answer");
    let output = kilnc()
        .args(["--verbose", "build", src.to_str().unwrap(), "-o", exe.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("-O2"), "{stderr}");
}

#[test]
fn invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_program(dir.path(), &answer());
    std::fs::write(dir.path().join("kiln.toml"), "[build]\nbackend = \"wasm\"\n").unwrap();
    let output = kilnc().args(["check", src.to_str().unwrap()]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[config]"), "{stderr}");
    assert!(stderr.contains("kiln.toml"), "{stderr}");
}

#[test]
fn explicit_config_flag() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_program(dir.path(), &answer());
    let cfg = dir.path().join("custom.toml");
    std::fs::write(&cfg, "[link]\nunknown_key = 1\n").unwrap();
    let output = kilnc()
        .args(["--config", cfg.to_str().unwrap(), "check", src.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("custom.toml"));
}

#[test]
fn no_bounds_checks_flag_drops_checks() {
    let dir = tempfile::tempdir().unwrap();
    let prog = main_only(vec![
        let_("xs", array(KilnType::Int, vec![int(1), int(2)])),
        ret(index(ident("xs", KilnType::array(KilnType::Int)), int(1))),
    ]);
    let src = write_program(dir.path(), &prog);
    let checked = kilnc().args(["emit-c", src.to_str().unwrap()]).output().unwrap();
    let unchecked = kilnc().args(["emit-c", src.to_str().unwrap(), "--no-bounds-checks"]).output().unwrap();
    assert!(String::from_utf8_lossy(&checked.stdout).contains("index out of bounds"));
    assert!(!String::from_utf8_lossy(&unchecked.stdout).contains("index out of bounds"));
}
