//! Built-in functions callable from expressions
//!
//! Each entry declares a fixed parameter count; the parser rejects calls
//! with a different count. Parameters are evaluated lazily through [`Args`],
//! which lets `if` skip the branch it does not take.
//!
//! The `ui*` helpers return their first parameter unchanged. They exist so
//! an attribute can carry a widget hint inside its own expression, e.g.
//! `uiCombo(0, "Left;Center;Right")`.

use crate::instr::Args;
use crate::value::Value;

/// Function implementing a built-in
pub type ApiFn = fn(&mut Args<'_>) -> Value;

/// API table entry
#[derive(Clone, Copy)]
pub struct Api {
    pub name: &'static str,
    pub params: usize,
    pub func: ApiFn,
    /// Widget hint helper rather than a computation
    pub ui: bool,
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

const fn api(name: &'static str, params: usize, func: ApiFn) -> Api {
    Api {
        name,
        params,
        func,
        ui: false,
    }
}

const fn ui(name: &'static str, params: usize) -> Api {
    Api {
        name,
        params,
        func: api_passthrough,
        ui: true,
    }
}

pub const APIS: &[Api] = &[
    api("if", 3, api_if),
    api("not", 1, api_not),
    api("min", 2, api_min),
    api("max", 2, api_max),
    api("clamp", 3, api_clamp),
    api("sqrt", 1, api_sqrt),
    api("pow", 2, api_pow),
    api("pi", 0, api_pi),
    api("sin", 1, api_sin),
    api("cos", 1, api_cos),
    api("tan", 1, api_tan),
    api("atan", 1, api_atan),
    api("log", 1, api_log),
    api("exp", 1, api_exp),
    ui("uiSwitch", 1),
    ui("uiCheckbox", 1),
    ui("uiCombo", 2),
    ui("uiDate", 1),
    ui("uiColor", 1),
];

/// Look up a built-in, ignoring ASCII case
pub fn find(name: &str) -> Option<&'static Api> {
    APIS.iter().find(|a| a.name.eq_ignore_ascii_case(name))
}

fn api_if(args: &mut Args<'_>) -> Value {
    let cond = args.value(0).is_truthy();
    args.value(if cond { 1 } else { 2 })
}

fn api_not(args: &mut Args<'_>) -> Value {
    Value::from_bool(!args.value(0).is_truthy())
}

fn api_min(args: &mut Args<'_>) -> Value {
    let a = args.number(0);
    let b = args.number(1);
    Value::Number(a.min(b))
}

fn api_max(args: &mut Args<'_>) -> Value {
    let a = args.number(0);
    let b = args.number(1);
    Value::Number(a.max(b))
}

fn api_clamp(args: &mut Args<'_>) -> Value {
    let v = args.number(0);
    let lo = args.number(1);
    let hi = args.number(2);
    let clamped = if v < lo {
        lo
    } else if v > hi {
        hi
    } else {
        v
    };
    Value::Number(clamped)
}

fn api_sqrt(args: &mut Args<'_>) -> Value {
    let v = args.number(0);
    if v >= 0.0 {
        Value::Number(v.sqrt())
    } else {
        log::warn!("Square root of negative number {}", v);
        Value::Number(0.0)
    }
}

fn api_pow(args: &mut Args<'_>) -> Value {
    let v = args.number(0);
    let e = args.number(1);
    Value::Number(v.powf(e))
}

fn api_pi(_args: &mut Args<'_>) -> Value {
    Value::Number(std::f64::consts::PI)
}

fn api_sin(args: &mut Args<'_>) -> Value {
    Value::Number(args.number(0).sin())
}

fn api_cos(args: &mut Args<'_>) -> Value {
    Value::Number(args.number(0).cos())
}

fn api_tan(args: &mut Args<'_>) -> Value {
    Value::Number(args.number(0).tan())
}

fn api_atan(args: &mut Args<'_>) -> Value {
    Value::Number(args.number(0).atan())
}

fn api_log(args: &mut Args<'_>) -> Value {
    Value::Number(args.number(0).ln())
}

fn api_exp(args: &mut Args<'_>) -> Value {
    Value::Number(args.number(0).exp())
}

fn api_passthrough(args: &mut Args<'_>) -> Value {
    args.value(0)
}
