use std::sync::{LazyLock, atomic::Ordering};

use itertools::Itertools;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use super::{Library, SYSTEM_LIBRARY};
use crate::{
    Engine, Node,
    class,
    eval::error::RuntimeError,
    grammar::{loader, rule::Alternative},
    kind::Kind,
    number::Number,
    value::CallParts,
};

type BuiltinResult = Result<Node, RuntimeError>;

#[derive(Clone, Debug)]
pub struct BuiltinFunction {
    pub num_params: ParamNum,
    /// Lazy builtins receive their arguments unevaluated.
    pub lazy: bool,
    pub func: fn(&mut Engine, &str, Vec<Node>) -> BuiltinResult,
}

#[derive(Clone, Debug)]
pub enum ParamNum {
    None,
    Fixed(u8),
    Range(u8, u8),
}

impl ParamNum {
    pub fn to_num(&self) -> u8 {
        match self {
            ParamNum::None => 0,
            ParamNum::Fixed(n) => *n,
            ParamNum::Range(min, _) => *min,
        }
    }

    #[inline(always)]
    pub fn is_valid(&self, num_args: usize) -> bool {
        match self {
            ParamNum::None => num_args == 0,
            ParamNum::Fixed(n) => num_args == *n as usize,
            ParamNum::Range(min, max) => num_args >= *min as usize && num_args <= *max as usize,
        }
    }
}

impl BuiltinFunction {
    pub fn new(num_params: ParamNum, func: fn(&mut Engine, &str, Vec<Node>) -> BuiltinResult) -> Self {
        BuiltinFunction {
            num_params,
            lazy: false,
            func,
        }
    }

    pub fn lazy(num_params: ParamNum, func: fn(&mut Engine, &str, Vec<Node>) -> BuiltinResult) -> Self {
        BuiltinFunction {
            num_params,
            lazy: true,
            func,
        }
    }
}

pub static BUILTIN_FUNCTIONS: LazyLock<FxHashMap<SmolStr, BuiltinFunction>> = LazyLock::new(|| {
    let mut map = FxHashMap::default();

    map.insert(
        SmolStr::new("lit"),
        BuiltinFunction::new(ParamNum::Fixed(1), |_, _, mut args| Ok(args.remove(0))),
    );
    map.insert(
        SmolStr::new("named"),
        BuiltinFunction::lazy(ParamNum::Fixed(2), |engine, _, args| {
            let name = args[0].text().into_owned();
            Ok(engine.eval_arg(&args[1])?.with_name(name))
        }),
    );
    map.insert(
        SmolStr::new("add"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, name, args| add(name, &args)),
    );
    map.insert(
        SmolStr::new("sub"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, name, args| {
            arithmetic(name, &args, Number::checked_sub)
        }),
    );
    map.insert(
        SmolStr::new("mul"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, name, args| {
            arithmetic(name, &args, Number::checked_mul)
        }),
    );
    map.insert(
        SmolStr::new("div"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, name, args| {
            arithmetic(name, &args, Number::checked_div)
        }),
    );
    map.insert(
        SmolStr::new("mod"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, name, args| {
            arithmetic(name, &args, Number::checked_rem)
        }),
    );
    map.insert(
        SmolStr::new("neg"),
        BuiltinFunction::new(ParamNum::Fixed(1), |_, name, args| {
            match args.first().and_then(Node::as_number) {
                Some(n) => n
                    .checked_neg()
                    .map(Node::number)
                    .ok_or_else(|| RuntimeError::Overflow(SmolStr::new(name))),
                None => Err(RuntimeError::invalid_types(name, &args)),
            }
        }),
    );
    map.insert(
        SmolStr::new("eq"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, _, args| Ok(Node::boolean(equals(&args[0], &args[1])))),
    );
    map.insert(
        SmolStr::new("ne"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, _, args| Ok(Node::boolean(!equals(&args[0], &args[1])))),
    );
    map.insert(
        SmolStr::new("lt"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, name, args| compare(name, &args, |o| o.is_lt())),
    );
    map.insert(
        SmolStr::new("gt"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, name, args| compare(name, &args, |o| o.is_gt())),
    );
    map.insert(
        SmolStr::new("le"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, name, args| compare(name, &args, |o| o.is_le())),
    );
    map.insert(
        SmolStr::new("ge"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, name, args| compare(name, &args, |o| o.is_ge())),
    );
    map.insert(
        SmolStr::new("and"),
        BuiltinFunction::lazy(ParamNum::Fixed(2), |engine, _, args| {
            Ok(Node::boolean(
                engine.eval_arg(&args[0])?.is_truthy() && engine.eval_arg(&args[1])?.is_truthy(),
            ))
        }),
    );
    map.insert(
        SmolStr::new("or"),
        BuiltinFunction::lazy(ParamNum::Fixed(2), |engine, _, args| {
            Ok(Node::boolean(
                engine.eval_arg(&args[0])?.is_truthy() || engine.eval_arg(&args[1])?.is_truthy(),
            ))
        }),
    );
    map.insert(
        SmolStr::new("not"),
        BuiltinFunction::new(ParamNum::Fixed(1), |_, _, args| Ok(Node::boolean(!args[0].is_truthy()))),
    );
    map.insert(
        SmolStr::new("concat"),
        BuiltinFunction::new(ParamNum::Range(0, u8::MAX), |_, _, args| {
            Ok(Node::str(&args.iter().map(|arg| arg.text()).join("")))
        }),
    );
    map.insert(
        SmolStr::new("array"),
        BuiltinFunction::new(ParamNum::Range(0, u8::MAX), |_, _, args| {
            Ok(Node::array(args.into_iter().map(|arg| arg.with_name("")).collect()))
        }),
    );
    map.insert(
        SmolStr::new("list"),
        BuiltinFunction::new(ParamNum::Range(0, u8::MAX), |_, _, args| Ok(Node::list(Kind::List, args))),
    );
    map.insert(
        SmolStr::new("setvar"),
        BuiltinFunction::lazy(ParamNum::Fixed(2), |engine, _, args| {
            let value = engine.eval_arg(&args[1])?;
            engine.env.set(&args[0].text(), value);
            Ok(Node::null())
        }),
    );
    map.insert(
        SmolStr::new("getvar"),
        BuiltinFunction::lazy(ParamNum::Fixed(1), |engine, _, args| {
            let name = args[0].text();
            engine
                .env
                .get(&name)
                .map(|value| value.clone().with_name(""))
                .ok_or_else(|| RuntimeError::NotDefined(SmolStr::new(name)))
        }),
    );
    map.insert(
        SmolStr::new("addvar"),
        BuiltinFunction::lazy(ParamNum::Fixed(2), |engine, name, args| {
            update(engine, name, args, |name, current, value| add(name, &[current, value]))
        }),
    );
    map.insert(
        SmolStr::new("subvar"),
        BuiltinFunction::lazy(ParamNum::Fixed(2), |engine, name, args| {
            update(engine, name, args, |name, current, value| {
                arithmetic(name, &[current, value], Number::checked_sub)
            })
        }),
    );
    map.insert(
        SmolStr::new("if"),
        BuiltinFunction::lazy(ParamNum::Range(2, 3), |engine, _, args| {
            if engine.eval_arg(&args[0])?.is_truthy() {
                engine.eval_branch(&args[1])
            } else if let Some(otherwise) = args.get(2) {
                engine.eval_branch(otherwise)
            } else {
                Ok(Node::null())
            }
        }),
    );
    map.insert(
        SmolStr::new("while"),
        BuiltinFunction::lazy(ParamNum::Fixed(2), |engine, _, args| {
            let mut last = Node::null();
            loop {
                if engine.stop.load(Ordering::Relaxed) {
                    return Err(RuntimeError::Stopped);
                }
                if !engine.eval_arg(&args[0])?.is_truthy() {
                    return Ok(last);
                }
                last = engine.eval_branch(&args[1])?;
                if last.is_error() {
                    return Ok(last);
                }
            }
        }),
    );
    map.insert(
        SmolStr::new("fail"),
        BuiltinFunction::new(ParamNum::Range(0, 1), |_, _, args| {
            Err(RuntimeError::User(
                args.first()
                    .map(|message| message.text().into_owned())
                    .unwrap_or_else(|| "fail".to_string()),
            ))
        }),
    );
    map.insert(
        SmolStr::new("error"),
        BuiltinFunction::new(ParamNum::Range(1, 2), |_, name, args| match args.first().and_then(Node::as_number) {
            Some(Number::Int(code)) => Err(RuntimeError::Code {
                code,
                message: args.get(1).map(|m| m.text().into_owned()).unwrap_or_default(),
            }),
            _ => Err(RuntimeError::invalid_types(name, &args)),
        }),
    );
    map.insert(
        SmolStr::new("echo"),
        BuiltinFunction::new(ParamNum::Range(0, u8::MAX), |engine, _, args| {
            engine.echo(&args.iter().map(|arg| arg.text()).join(" "));
            Ok(Node::null())
        }),
    );
    map.insert(
        SmolStr::new("call"),
        BuiltinFunction::lazy(ParamNum::Range(1, u8::MAX), |engine, name, mut args| {
            let target = engine.eval_arg(&args.remove(0))?;
            if target.is_function() {
                let args = engine.eval_args(args)?;
                engine.invoke(&target, args)
            } else if target.kind.is_textual() {
                engine.run_call(None, &target.text(), args)
            } else {
                Err(RuntimeError::invalid_types(name, &[target]))
            }
        }),
    );
    map.insert(
        SmolStr::new("lambda"),
        BuiltinFunction::lazy(ParamNum::Fixed(2), |engine, _, mut args| {
            // the body outlives this statement's arena
            let body = engine.resolve_pointers(&args.pop().unwrap_or_default())?;
            let params = args.pop().unwrap_or_default();
            Ok(Node::function(&params, body))
        }),
    );
    map.insert(
        SmolStr::new("type"),
        BuiltinFunction::new(ParamNum::Fixed(1), |_, _, args| Ok(Node::str(&args[0].kind.to_string()))),
    );
    map.insert(
        SmolStr::new("iserr"),
        BuiltinFunction::lazy(ParamNum::Fixed(1), |engine, _, args| {
            Ok(Node::boolean(engine.eval_branch(&args[0])?.is_error()))
        }),
    );
    map.insert(
        SmolStr::new("exit"),
        BuiltinFunction::new(ParamNum::None, |engine, _, _| {
            engine.exited = true;
            Ok(Node::null())
        }),
    );
    map.insert(
        SmolStr::new("token"),
        BuiltinFunction::new(ParamNum::Range(2, u8::MAX), |engine, _, args| {
            let flags = args[2..].iter().map(|flag| flag.text().into_owned()).collect::<Vec<_>>();
            let flags = loader::parse_flags(&flags)?;
            let kind = loader::parse_kind(&args[0].text())?;
            engine.add_token(kind, "", flags, args[1].text().as_bytes());
            Ok(Node::null())
        }),
    );
    map.insert(
        SmolStr::new("rule"),
        BuiltinFunction::new(ParamNum::Range(2, 3), |engine, name, args| {
            let params = match &args[1] {
                node if node.is_list() => node
                    .children()
                    .iter()
                    .map(|param| engine.parse_param(&param.text()))
                    .collect::<Result<Vec<_>, _>>()?,
                node => return Err(RuntimeError::invalid_types(name, std::slice::from_ref(node))),
            };
            let mut alternative = Alternative::new(params);
            if let Some(function) = args.get(2) {
                alternative = alternative.with_function(None, &function.text());
            }
            Ok(Node::rule(engine.add_alternative(&args[0].text(), alternative)))
        }),
    );
    map.insert(
        SmolStr::new("grammar"),
        BuiltinFunction::new(ParamNum::Fixed(1), |engine, _, args| {
            engine.load_grammar(&args[0].text())?;
            Ok(Node::null())
        }),
    );
    map.insert(
        SmolStr::new("class"),
        BuiltinFunction::new(ParamNum::Fixed(1), |engine, _, args| {
            Ok(class::load_class(engine, &args[0].text())?)
        }),
    );
    map.insert(
        SmolStr::new("get"),
        BuiltinFunction::new(ParamNum::Fixed(2), |_, name, args| {
            let found = match args[1].as_number() {
                Some(Number::Int(i)) if i >= 0 => args[0].children().get(i as usize),
                _ if args[1].kind.is_textual() => args[0].child(&args[1].text()),
                _ => return Err(RuntimeError::invalid_types(name, &args)),
            };
            Ok(found.cloned().map(|node| node.with_name("")).unwrap_or_default())
        }),
    );
    map.insert(
        SmolStr::new("len"),
        BuiltinFunction::new(ParamNum::Fixed(1), |_, _, args| {
            let len = match args[0].as_bytes() {
                Some(bytes) if args[0].kind.is_textual() => String::from_utf8_lossy(bytes).chars().count(),
                Some(bytes) => bytes.len(),
                None => args[0].children().len(),
            };
            Ok(Node::int(len as i64))
        }),
    );

    map
});

fn add(name: &str, args: &[Node]) -> BuiltinResult {
    match args {
        [a, b] if a.kind.is_textual() || b.kind.is_textual() => {
            Ok(Node::str(&format!("{}{}", a.text(), b.text())))
        }
        [a, b] if a.kind == Kind::Array && b.kind == Kind::Array => Ok(Node::array(
            a.children().iter().chain(b.children()).cloned().collect(),
        )),
        _ => arithmetic(name, args, Number::checked_add),
    }
}

fn arithmetic(name: &str, args: &[Node], op: fn(Number, Number) -> Option<Number>) -> BuiltinResult {
    match args {
        [a, b] => match (a.as_number(), b.as_number()) {
            (Some(_), Some(b)) if b.is_zero() && matches!(name, "div" | "mod") => Err(RuntimeError::ZeroDivision),
            (Some(a), Some(b)) => op(a, b)
                .map(Node::number)
                .ok_or_else(|| RuntimeError::Overflow(SmolStr::new(name))),
            _ => Err(RuntimeError::invalid_types(name, args)),
        },
        _ => Err(RuntimeError::invalid_types(name, args)),
    }
}

/// Numeric when both sides are numbers, otherwise structural. Names are ignored.
fn equals(a: &Node, b: &Node) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(a), Some(b)) => a == b,
        _ if a.is_list() && b.is_list() => {
            a.kind == b.kind
                && a.children().len() == b.children().len()
                && a.children().iter().zip(b.children()).all(|(a, b)| equals(a, b))
        }
        _ => a.kind == b.kind && a.payload == b.payload,
    }
}

fn compare(name: &str, args: &[Node], accept: fn(std::cmp::Ordering) -> bool) -> BuiltinResult {
    let [a, b] = args else {
        return Err(RuntimeError::invalid_types(name, args));
    };
    let ordering = match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ if a.kind.is_textual() && b.kind.is_textual() => Some(a.text().cmp(&b.text())),
        _ => None,
    };

    ordering
        .map(|ordering| Node::boolean(accept(ordering)))
        .ok_or_else(|| RuntimeError::invalid_types(name, args))
}

fn update(
    engine: &mut Engine,
    name: &str,
    args: Vec<Node>,
    op: fn(&str, Node, Node) -> BuiltinResult,
) -> BuiltinResult {
    let variable = args[0].text().into_owned();
    let current = engine
        .env
        .get(&variable)
        .cloned()
        .ok_or_else(|| RuntimeError::NotDefined(SmolStr::new(&variable)))?;
    let value = engine.eval_arg(&args[1])?;
    let updated = op(name, current.with_name(""), value)?;
    engine.env.set(&variable, updated);
    Ok(Node::null())
}

/// The `$SYS` library. Functions it does not know are looked up as user
/// functions in the session's variables.
pub struct SystemLibrary;

impl Library for SystemLibrary {
    fn name(&self) -> &str {
        SYSTEM_LIBRARY
    }

    fn run(&self, engine: &mut Engine, function: &str, args: Vec<Node>) -> BuiltinResult {
        match BUILTIN_FUNCTIONS.get(function) {
            Some(builtin) => {
                if !builtin.num_params.is_valid(args.len()) {
                    return Err(RuntimeError::InvalidNumberOfArguments(
                        SmolStr::new(function),
                        builtin.num_params.to_num(),
                        args.len(),
                    ));
                }
                let args = if builtin.lazy { args } else { engine.eval_args(args)? };
                (builtin.func)(engine, function, args)
            }
            None => match engine.env.get(function).filter(|value| value.is_function()).cloned() {
                Some(target) => {
                    let args = engine.eval_args(args)?;
                    engine.invoke(&target, args)
                }
                None => Err(RuntimeError::NotDefined(SmolStr::new(function))),
            },
        }
    }

    fn optimize(&self, _engine: &Engine, node: Node, function: &str) -> Node {
        fold(&node, function).unwrap_or(node)
    }
}

/// Constant folding of calls whose arguments are already values.
fn fold(node: &Node, function: &str) -> Option<Node> {
    let CallParts { args, .. } = node.call_parts()?;

    match function {
        "lit" => match args {
            [value] if !value.is_list() => Some(value.clone()),
            _ => None,
        },
        "named" => match args {
            [name, value] => Some(value.clone().with_name(name.text().into_owned())),
            _ => None,
        },
        _ if !args.iter().all(|arg| arg.kind.is_numeric()) => None,
        "neg" => args
            .first()
            .and_then(Node::as_number)
            .and_then(Number::checked_neg)
            .map(Node::number),
        "add" => add(function, args).ok(),
        "sub" => arithmetic(function, args, Number::checked_sub).ok(),
        "mul" => arithmetic(function, args, Number::checked_mul).ok(),
        "div" => arithmetic(function, args, Number::checked_div).ok(),
        "mod" => arithmetic(function, args, Number::checked_rem).ok(),
        _ => None,
    }
}
