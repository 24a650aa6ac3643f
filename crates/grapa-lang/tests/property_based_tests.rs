//! Property-based tests for grapa-lang sessions, matching and the binary format.
use grapa_lang::{AsyncSession, Engine, Input, Kind, Node, Options, Session, SessionEvent, from_bytes, to_bytes};
use proptest::prelude::*;

mod strategies {
    use super::*;

    /// Arithmetic source text over small integers, parenthesised at random.
    pub fn expression() -> impl Strategy<Value = String> {
        let leaf = (0i64..100).prop_map(|n| n.to_string());
        leaf.prop_recursive(3, 16, 2, |inner| {
            prop_oneof![
                (inner.clone(), prop::sample::select(vec!["+", "-", "*"]), inner.clone())
                    .prop_map(|(a, op, b)| format!("{a} {op} {b}")),
                inner.prop_map(|e| format!("({e})")),
            ]
        })
    }

    /// Statements assigning and combining variables.
    pub fn program() -> impl Strategy<Value = String> {
        prop::collection::vec(expression(), 1..5).prop_map(|exprs| {
            let mut lines = exprs
                .iter()
                .enumerate()
                .map(|(i, e)| format!("v{i} = {e};"))
                .collect::<Vec<_>>();
            let sum = (0..exprs.len()).map(|i| format!("v{i}")).collect::<Vec<_>>().join(" + ");
            lines.push(sum);
            lines.join("\n")
        })
    }

    pub fn name() -> impl Strategy<Value = String> {
        prop_oneof![Just(String::new()), "[a-z]{1,6}"]
    }

    pub fn leaf() -> impl Strategy<Value = Node> {
        prop_oneof![
            any::<i64>().prop_map(Node::int),
            (-1.0e6f64..1.0e6).prop_map(Node::float),
            "[a-zA-Z0-9 ]{0,12}".prop_map(|s| Node::str(&s)),
            any::<bool>().prop_map(Node::boolean),
            Just(Node::null()),
        ]
    }

    pub fn value() -> impl Strategy<Value = Node> {
        (leaf(), name())
            .prop_map(|(node, name)| node.with_name(name))
            .prop_recursive(3, 24, 4, |inner| {
                (
                    prop::sample::select(vec![Kind::Array, Kind::List, Kind::Tuple]),
                    prop::collection::vec(inner, 0..4),
                    name(),
                )
                    .prop_map(|(kind, children, name)| Node::list(kind, children).with_name(name))
            })
    }
}

/// Values an [`AsyncSession`] reports for `program` fed in `chunk`-byte pieces.
fn async_results(program: &str, chunk: usize) -> Vec<Node> {
    let session = AsyncSession::spawn(Engine::default());
    let events = session.events().clone();

    for part in program.as_bytes().chunks(chunk) {
        session.send_input(Input::Text(part.to_vec()));
    }
    session.finish();
    session.join();

    events
        .try_iter()
        .filter_map(|event| match event {
            SessionEvent::Result(value) => Some(value),
            _ => None,
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn chunked_feed_matches_whole_input(program in strategies::program(), chunk in 1usize..8) {
        let expected = Engine::default().eval(&program).unwrap();

        let mut session = Session::default();
        let mut results = Vec::new();
        for part in program.as_bytes().chunks(chunk) {
            results.extend(session.feed(part).unwrap());
        }
        results.extend(session.finish().unwrap());

        prop_assert_eq!(results.last(), Some(&expected));
    }

    #[test]
    fn async_segments_do_not_depend_on_chunking(program in strategies::program(), chunk in 1usize..8) {
        let expected = Engine::default().eval(&program).unwrap();

        let whole = async_results(&program, program.len());
        let bytewise = async_results(&program, 1);

        prop_assert_eq!(whole.last(), Some(&expected));
        prop_assert_eq!(&bytewise, &whole);
        prop_assert_eq!(async_results(&program, chunk), whole);
    }

    #[test]
    fn prefix_reuse_does_not_change_results(program in strategies::program()) {
        let run = |prefix_reuse: bool| {
            Engine::with_options(Options { prefix_reuse, optimize: false, ..Options::default() })
                .eval(&program)
                .unwrap()
        };

        prop_assert_eq!(run(true), run(false));
    }

    #[test]
    fn optimizer_preserves_values(expr in strategies::expression()) {
        let run = |optimize: bool| {
            Engine::with_options(Options { optimize, ..Options::default() })
                .eval(&expr)
                .unwrap()
        };

        prop_assert_eq!(run(true), run(false));
    }

    #[test]
    fn values_survive_the_binary_format(value in strategies::value()) {
        prop_assert_eq!(from_bytes(&to_bytes(&value)).unwrap(), value);
    }
}
