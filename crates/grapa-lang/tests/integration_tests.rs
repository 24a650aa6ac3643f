use std::{fs, sync::Arc};

use grapa_lang::{
    Engine, GrammarError, InnerError, Kind, Library, Node, Options, RuntimeError, SYNTAX_ERROR_CODE, Session,
    class, from_bytes, register_library, to_bytes,
};
use rstest::{fixture, rstest};
use scopeguard::defer;

#[fixture]
fn engine() -> Engine {
    Engine::default()
}

fn text(node: Option<&Node>) -> Option<String> {
    node.map(|n| n.to_string())
}

#[rstest]
#[case::left_assoc("10 - 3 - 2", "5")]
#[case::division("7 / 2", "3")]
#[case::float("1.5 * 2", "3.0")]
#[case::modulo("10 % 4", "2")]
#[case::unary("-(2 + 3)", "-5")]
#[case::not("!(1 == 2)", "true")]
#[case::string_compare("\"abc\" < \"abd\"", "true")]
#[case::nested_call("f = op(x) { x + 1 }; g = op(y) { f(y) * 2 }; g(4)", "10")]
#[case::recursion("fact = op(n) { if (n <= 1) { 1 } else { n * fact(n - 1) } }; fact(10)", "3628800")]
#[case::null("null", "null")]
#[case::get_by_name("p = { x: 1, y: 2 }; get(p, \"y\")", "2")]
#[case::get_by_index("get([4, 5, 6], 2)", "6")]
#[case::type_of("type(1.5)", "FLOAT")]
#[case::is_error("iserr(1 / 0)", "true")]
fn test_eval(mut engine: Engine, #[case] code: &str, #[case] expected: &str) {
    assert_eq!(engine.eval(code).unwrap().to_string(), expected);
}

#[rstest]
#[case::optimized(true)]
#[case::unoptimized(false)]
fn test_optimize_does_not_change_results(#[case] optimize: bool) {
    let mut engine = Engine::with_options(Options {
        optimize,
        ..Options::default()
    });

    assert_eq!(engine.eval("1 + 2 * 3 - 4 / 2").unwrap(), Node::int(5));
    assert_eq!(engine.eval("f(a: 1, b: 2)").unwrap().child("code"), Some(&Node::int(1).with_name("code")));
}

#[rstest]
fn test_block_stops_at_error(mut engine: Engine) {
    engine.eval("{ a = 1; fail(\"stop\"); b = 2 }; c = 3").unwrap();

    assert_eq!(text(engine.get_var("a")), Some("1".to_string()));
    assert_eq!(engine.get_var("b"), None);
    assert_eq!(text(engine.get_var("c")), Some("3".to_string()));
}

#[rstest]
fn test_error_value(mut engine: Engine) {
    let result = engine.eval("error(42, \"custom\")").unwrap();

    assert_eq!(result.kind, Kind::Err);
    assert_eq!(result.child("code"), Some(&Node::int(42).with_name("code")));
    assert_eq!(text(result.child("message")), Some("custom".to_string()));
}

#[rstest]
fn test_rule_added_from_script(mut engine: Engine) {
    engine.eval("double = op(sym, n) { n * 2 }").unwrap();
    engine.eval(r#"rule("custom_start", ["$start"])"#).unwrap();
    engine.eval(r#"rule("custom_start", ["'@'", "INT"], "double")"#).unwrap();

    assert_eq!(engine.eval("@ 21").unwrap(), Node::int(42));
    assert_eq!(engine.eval("1 + 1").unwrap(), Node::int(2));
}

#[rstest]
fn test_token_added_from_script(mut engine: Engine) {
    engine.eval(r#"token("SYM", "**")"#).unwrap();

    let tokens = engine.tokenize("2 ** 3");
    assert!(tokens.iter().any(|t| t.kind == Kind::Sym && t.value == b"**" && t.is_registered()));
}

#[rstest]
fn test_guarded_rule(mut engine: Engine) {
    engine
        .eval("positive = op(n) { if (n > 0) { 1 } else { fail() } }")
        .unwrap();
    engine
        .load_grammar(
            r#"
            [[rules]]
            name = "custom_start"
            alternatives = [
                { params = ["'#'", { rule = "$unary", guard = "positive" }], op = "lit", args = [2] },
                { params = ["$start"] },
            ]
            "#,
        )
        .unwrap();

    assert_eq!(engine.eval("# 5").unwrap(), Node::int(5));
    let rejected = engine.eval("# -5").unwrap();
    assert_eq!(rejected.child("code"), Some(&Node::int(SYNTAX_ERROR_CODE).with_name("code")));
}

#[rstest]
fn test_wildcard_capture(mut engine: Engine) {
    engine
        .load_grammar(
            r#"
            [[rules]]
            name = "custom_start"
            alternatives = [
                { params = ["'count'", "*"], op = "len", args = [2] },
                { params = ["$start"] },
            ]
            "#,
        )
        .unwrap();

    assert_eq!(engine.eval("count a b c").unwrap(), Node::int(3));
}

#[rstest]
fn test_lookup_param(mut engine: Engine) {
    engine.eval("colors = { red: 1, green: 2 }").unwrap();
    engine
        .load_grammar(
            r#"
            [[rules]]
            name = "custom_start"
            alternatives = [
                { params = ["'color'", { lookup = "colors" }] },
                { params = ["$start"] },
            ]
            "#,
        )
        .unwrap();

    assert_eq!(engine.eval("color green").unwrap(), Node::int(2).with_name("green"));
}

struct Greeting;

impl Library for Greeting {
    fn name(&self) -> &str {
        "Greeting"
    }

    fn run(&self, _engine: &mut Engine, function: &str, args: Vec<Node>) -> Result<Node, RuntimeError> {
        match (function, args.as_slice()) {
            ("greet", [name]) => Ok(Node::str(&format!("Hello, {}!", name.text()))),
            _ => Err(RuntimeError::NotDefined(function.into())),
        }
    }
}

#[rstest]
fn test_custom_library(mut engine: Engine) {
    register_library(Arc::new(Greeting));
    engine
        .load_grammar(
            r#"
            [[rules]]
            name = "custom_start"
            alternatives = [
                { params = ["'hello'", "$name"], op = "greet", lib = "Greeting", args = [2] },
                { params = ["$start"] },
            ]

            [[rules]]
            name = "$name"
            alternatives = [{ params = ["ID"] }]
            "#,
        )
        .unwrap();

    assert_eq!(engine.eval("hello world").unwrap(), Node::str("Hello, world!"));
}

#[rstest]
#[case::single_trailing("let x = y", "y")]
#[case::several_trailing("let x = y z w", "y z w")]
fn test_syntax_error_reports_match_and_fail(#[case] code: &str, #[case] fail: &str) {
    let mut engine = Engine::new();
    engine
        .load_grammar(
            r#"
            [[tokens]]
            kind = "SYM"
            text = " "
            flags = ["skip"]

            [[rules]]
            name = "$start"
            alternatives = [{ params = ["'let'", "ID", "'='", "INT"], op = "setvar", args = [2, 4] }]
            "#,
        )
        .unwrap();

    let result = engine.eval(code).unwrap();
    assert_eq!(result.child("code"), Some(&Node::int(SYNTAX_ERROR_CODE).with_name("code")));
    assert_eq!(text(result.child("match")), Some("let x =".to_string()));
    assert_eq!(text(result.child("fail")), Some(fail.to_string()));

    engine.eval("let x = 3").unwrap();
    assert_eq!(text(engine.get_var("x")), Some("3".to_string()));
}

#[test]
fn test_missing_start_rule() {
    let error = Engine::new().eval("1").unwrap_err();
    assert_eq!(error.cause, InnerError::Grammar(GrammarError::MissingStart));
}

#[test]
fn test_value_round_trip() {
    let value = Node::list(
        Kind::List,
        vec![
            Node::int(-7).with_name("n"),
            Node::str("text").with_name("s"),
            Node::array(vec![Node::float(0.25), Node::boolean(true), Node::null()]).with_name("items"),
        ],
    );

    assert_eq!(from_bytes(&to_bytes(&value)).unwrap(), value);
}

#[test]
fn test_class_loaded_from_search_path() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("square_shape.grc"), "sides = 4; area = op(s) { s * s }").unwrap();
    defer! {
        class::forget_class("square_shape");
    }

    let mut engine = Engine::with_options(Options {
        search_paths: vec![dir.path().to_path_buf()],
        ..Options::default()
    });
    engine.eval("c = class(\"square_shape\")").unwrap();

    assert_eq!(engine.eval("get(c, \"sides\")").unwrap(), Node::int(4));
    assert_eq!(engine.eval("call(get(c, \"area\"), 3)").unwrap(), Node::int(9));
    assert!(class::cached_class("square_shape").is_some());

    let missing = engine.eval("class(\"no_such_class\")").unwrap();
    assert!(missing.is_error());
}

#[test]
fn test_session_chunks_match_whole_input() {
    let code = "total = 0; i = 1; while (i <= 4) { total += i; i += 1 }; total";
    let expected = Engine::default().eval(code).unwrap();

    let mut session = Session::default();
    for chunk in code.as_bytes().chunks(3) {
        session.feed(chunk).unwrap();
    }
    let results = session.finish().unwrap();

    assert_eq!(results.last(), Some(&expected));
    assert_eq!(expected, Node::int(10));
}
