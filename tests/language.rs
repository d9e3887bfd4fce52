use expression_interpreter::{
    Environment, Error, HostError, HostFunction, Interpreter, List, ParseError, Record,
    RuntimeError, Value, ValueType, parse, run,
};

fn assert_value(src: &str, environment: &mut Environment, expected: Value) {
    match run(src, environment) {
        Ok(value) => assert_eq!(value, expected, "`{src}` evaluated to the wrong value"),
        Err(e) => panic!("`{src}` failed: {e}"),
    }
}

fn assert_runtime_error(src: &str, environment: &mut Environment) -> RuntimeError {
    match run(src, environment) {
        Err(Error::Runtime(e)) => e,
        other => panic!("`{src}` should fail at runtime, got {other:?}"),
    }
}

fn assert_parse_error(src: &str) -> ParseError {
    match parse(src) {
        Err(Error::Parse(e)) => e,
        other => panic!("`{src}` should fail to parse, got {other:?}"),
    }
}

fn value(src: &str) -> Value {
    let mut environment = Environment::new();
    match run(src, &mut environment) {
        Ok(value) => value,
        Err(e) => panic!("`{src}` failed: {e}"),
    }
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(value("1+2*3"), Value::Int(7));
    assert_eq!(value("(1+2)*3"), Value::Int(9));
    assert_eq!(value("10 - 4 - 3"), Value::Int(3));
    assert_eq!(value("2 * 3 % 4"), Value::Int(2));
}

#[test]
fn exponent_is_right_associative() {
    assert_eq!(value("2^3^2"), Value::Decimal(512.0));
    assert_eq!(value("(2^3)^2"), Value::Decimal(64.0));
}

#[test]
fn nested_ternary() {
    assert_eq!(value("1>0?2>1?10:20:30"), Value::Int(10));
    assert_eq!(value("1<0?10:2<1?20:30"), Value::Int(30));
}

#[test]
fn compound_assignments_run_right_to_left() {
    let mut environment = Environment::new().with_value("i", 1);
    assert_value("i=i+=i+=i", &mut environment, Value::Int(4));
    assert_eq!(environment.get("i"), Some(&Value::Int(4)));

    let mut environment = Environment::new().with_value("i", 1);
    assert_value("i *= i += i += i", &mut environment, Value::Int(16));
}

#[test]
fn literals_keep_their_value() {
    assert_eq!(value("0"), Value::Int(0));
    assert_eq!(value("123456789"), Value::Int(123456789));
    assert_eq!(value("3.25"), Value::Decimal(3.25));
    assert_eq!(value("7."), Value::Decimal(7.0));
    assert_eq!(value(r#""a\"b""#), Value::from("a\"b"));
    assert_eq!(value("false"), Value::Bool(false));
}

#[test]
fn integer_literals_read_back_exactly() {
    let shifts = (0..63).flat_map(|s| [1i64 << s, (1i64 << s) - 1, -(1i64 << s)]);
    let sweep = (0..2_000i64).map(|i| i * 4_611_686_018_427_387 + i % 7);
    for n in shifts.chain(sweep).chain([i64::MAX, i64::MIN + 1]) {
        assert_eq!(value(&n.to_string()), Value::Int(n), "integer {n}");
    }
}

#[test]
fn decimal_literals_read_back_exactly() {
    let sweep = (0..2_000i32).map(|i| f64::from(i) * 0.37 + 1.0 / f64::from(i + 1));
    let powers = (-300..300).map(|e| 1.7 * 10f64.powi(e));
    let edges = [0.0, 0.1, 0.5, 1e-300, f64::MIN_POSITIVE, f64::EPSILON, f64::MAX];
    for x in sweep.chain(powers).chain(edges) {
        let mut text = x.to_string();
        if !text.contains('.') {
            text.push('.');
        }
        assert_eq!(value(&text), Value::Decimal(x), "decimal {text}");
    }
}

#[test]
fn parse_errors() {
    assert!(matches!(
        assert_parse_error("1++"),
        ParseError::InvalidIncrementTarget { .. }
    ));
    assert!(matches!(
        assert_parse_error("let x += 1"),
        ParseError::CompoundDeclaration { .. }
    ));
    assert!(matches!(
        assert_parse_error("(1 + 2"),
        ParseError::ExpectedToken { .. }
    ));
}

#[test]
fn deep_nesting_within_the_limit() {
    let parens = format!("{}1{}", "(".repeat(40), ")".repeat(40));
    assert_eq!(value(&parens), Value::Int(1));
    assert_eq!(value(&format!("1{}", "+1".repeat(99))), Value::Int(100));
    assert_eq!(value(&format!("{}2", "false?1:".repeat(60))), Value::Int(2));

    assert!(matches!(
        assert_parse_error(&format!("{}1{}", "(".repeat(500), ")".repeat(500))),
        ParseError::TooDeep { .. }
    ));
}

#[test]
fn unknown_names() {
    let mut environment = Environment::new();
    assert_eq!(
        assert_runtime_error("missing + 1", &mut environment),
        RuntimeError::UnknownVariable {
            name: "missing".to_string()
        }
    );
    assert_eq!(
        assert_runtime_error("nope(1)", &mut environment),
        RuntimeError::UnknownFunction {
            name: "nope".to_string()
        }
    );
}

#[test]
fn host_objects() {
    let mut environment = Environment::new()
        .with_value(
            "point",
            Value::object(Record::new("Point").with_field("x", 3).with_field("y", 4)),
        )
        .with_value("arr", Value::list([Value::Int(10), Value::Int(20)]));

    assert_value("point.x", &mut environment, Value::Int(3));
    assert_value("arr[0]", &mut environment, Value::Int(10));
    assert_value("arr.length", &mut environment, Value::Int(2));
    assert_value("point[\"y\"] * arr[1]", &mut environment, Value::Int(80));

    assert_value("arr.push(point.x + 1)", &mut environment, Value::Int(3));
    assert_value("arr[2]", &mut environment, Value::Int(4));

    assert_value("point.x += 10", &mut environment, Value::Int(13));
    assert_value("arr[0]++", &mut environment, Value::Int(10));
    assert_value("--arr[0]", &mut environment, Value::Int(10));
    assert_value("point.x", &mut environment, Value::Int(13));

    assert!(matches!(
        assert_runtime_error("arr[5]", &mut environment),
        RuntimeError::Host(HostError::IndexOutOfRange { index: 5, len: 3 })
    ));
    assert!(matches!(
        assert_runtime_error("point.z", &mut environment),
        RuntimeError::Host(HostError::UnknownProperty { .. })
    ));
    assert!(matches!(
        assert_runtime_error("arr.length = 1", &mut environment),
        RuntimeError::Host(HostError::ReadOnly { .. })
    ));
}

#[test]
fn object_equality_is_identity() {
    let list = Value::object(List::default());
    let mut environment = Environment::new()
        .with_value("a", list.clone())
        .with_value("b", list)
        .with_value("c", Value::object(List::default()));

    assert_value("a == b", &mut environment, Value::Bool(true));
    assert_value("a == c", &mut environment, Value::Bool(false));
}

#[test]
fn host_functions() {
    let mut environment = Environment::new()
        .with_builtins()
        .with_function(
            "max",
            HostFunction::new(
                vec![ValueType::Decimal, ValueType::Decimal],
                ValueType::Decimal,
                |args| match args {
                    [Value::Decimal(a), Value::Decimal(b)] => Ok(Value::Decimal(a.max(*b))),
                    _ => Err(HostError::Failed("expected two decimals".to_string())),
                },
            ),
        );

    assert_value(
        "parseInt(eval(\"1 + 1\")) + 1 > 2",
        &mut environment,
        Value::Bool(true),
    );
    assert_value("max(1, 2.5)", &mut environment, Value::Decimal(2.5));

    assert!(matches!(
        assert_runtime_error("max(1)", &mut environment),
        RuntimeError::Call {
            source: HostError::Arity {
                expected: 2,
                found: 1
            },
            ..
        }
    ));
    assert!(matches!(
        assert_runtime_error("max(true, 1)", &mut environment),
        RuntimeError::Call {
            source: HostError::ArgumentType { position: 1, .. },
            ..
        }
    ));
    assert!(matches!(
        assert_runtime_error("parseInt(\"x\")", &mut environment),
        RuntimeError::Call {
            source: HostError::Failed(_),
            ..
        }
    ));
}

#[test]
fn declarations() {
    let mut environment = Environment::new();
    assert_value("let total = 2 * 21", &mut environment, Value::Int(42));
    assert_value("const limit = total - 2", &mut environment, Value::Int(40));
    assert_value("total > limit ? \"over\" : \"under\"", &mut environment, Value::from("over"));

    assert!(matches!(
        assert_runtime_error("limit /= 2", &mut environment),
        RuntimeError::ConstantReassignment { .. }
    ));

    // redeclaring shadows, constants included
    assert_value("let limit = 1", &mut environment, Value::Int(1));
    assert_value("limit += 1", &mut environment, Value::Int(2));
}

#[test]
fn short_circuit_mode() {
    let mut environment = Environment::new().with_value("n", 0);
    let expression = parse("true || n++ > 0").unwrap();

    Interpreter::new(&mut environment)
        .evaluate(&expression)
        .unwrap();
    assert_eq!(environment.get("n"), Some(&Value::Int(1)));

    Interpreter::new(&mut environment)
        .short_circuit(true)
        .evaluate(&expression)
        .unwrap();
    assert_eq!(environment.get("n"), Some(&Value::Int(1)));
}

#[test]
fn ast_round_trips_through_json() {
    let expression = parse("let x = a.b(1, \"two\")[i++] ? -y : z.w ^ 2.5").unwrap_or_else(|e| {
        panic!("failed to parse: {e}");
    });
    let json = serde_json::to_string(&expression).unwrap();
    let back: expression_interpreter::Expression = serde_json::from_str(&json).unwrap();
    assert_eq!(back, expression);
}
