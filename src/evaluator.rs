use std::collections::HashMap;
use std::io::{self, Write};

use tracing::{debug, trace};

use crate::Error;
use crate::ast::Node;
use crate::builtinops::{BuiltinOp, apply_binary, apply_unary, find_builtin};
use crate::control::{ControlBuilder, InitialState};
use crate::standardizer::standardize;
use crate::symbol::{Lambda, Symbol};

/// Environment for variable bindings
///
/// Environments live in the machine's append-only list and refer to each other
/// by index. A frame is never deleted: once its call returns it is only flagged
/// `removed`, and closures that captured it keep resolving names through it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Environment {
    index: usize,
    bindings: HashMap<String, Symbol>,
    parent: Option<usize>,
    /// Environment to restore when this frame's marker is reached
    caller: Option<usize>,
    removed: bool,
}

impl Environment {
    /// The empty primitive environment, index 0
    pub(crate) fn global() -> Self {
        Environment::default()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Binding made by this frame itself, ignoring parents
    pub fn get_binding(&self, name: &str) -> Option<&Symbol> {
        self.bindings.get(name)
    }
}

/// The CSE machine: control, stack and environments plus the sink `Print`
/// writes to
pub struct Machine<W: Write> {
    control: Vec<Symbol>,
    stack: Vec<Symbol>,
    environments: Vec<Environment>,
    current: usize,
    output: W,
    steps: usize,
}

impl<W: Write> Machine<W> {
    pub fn new(state: InitialState, output: W) -> Self {
        Machine {
            control: state.control,
            stack: state.stack,
            environments: state.environments,
            current: 0,
            output,
            steps: 0,
        }
    }

    /// Every environment created so far, in creation order
    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    /// Run until the control is empty and return the single remaining value
    pub fn run(&mut self) -> Result<Symbol, Error> {
        while let Some(symbol) = self.control.pop() {
            self.steps += 1;
            trace!(
                step = self.steps,
                symbol = %symbol,
                stack = self.stack.len(),
                env = self.current,
                "transition"
            );
            self.step(symbol)?;
        }
        self.output
            .flush()
            .map_err(|e| Error::EvalError(format!("failed to flush output: {e}")))?;

        let remaining = self.stack.len();
        match self.stack.pop() {
            Some(result) if remaining == 1 && !matches!(result, Symbol::EnvMarker(_)) => {
                debug!(
                    steps = self.steps,
                    environments = self.environments.len(),
                    result = %result,
                    "evaluation finished"
                );
                Ok(result)
            }
            _ => Err(Error::StructuralError(format!(
                "machine halted with {remaining} symbols on the stack"
            ))),
        }
    }

    fn step(&mut self, symbol: Symbol) -> Result<(), Error> {
        match symbol {
            Symbol::Identifier(name) => self.load(name),
            Symbol::Lambda(mut lambda) => {
                lambda.env = Some(self.current);
                self.stack.push(Symbol::Lambda(lambda));
                Ok(())
            }
            Symbol::Gamma => self.apply(),
            Symbol::EnvMarker(index) => self.exit(index),
            Symbol::UnaryOp(op) => {
                let operand = self.pop_value(op.as_str())?;
                self.stack.push(apply_unary(op, operand)?);
                Ok(())
            }
            Symbol::BinaryOp(op) => {
                let left = self.pop_value(op.as_str())?;
                let right = self.pop_value(op.as_str())?;
                self.stack.push(apply_binary(op, left, right)?);
                Ok(())
            }
            Symbol::Tau(n) => {
                let mut elements = Vec::with_capacity(n);
                for _ in 0..n {
                    elements.push(self.pop_value("tau")?);
                }
                self.stack.push(Symbol::Tuple(elements));
                Ok(())
            }
            Symbol::Beta => self.branch(),
            Symbol::Delta(delta) => {
                self.control.extend(delta.symbols.iter().cloned());
                Ok(())
            }
            Symbol::B(symbols) => {
                self.control.extend(symbols.iter().cloned());
                Ok(())
            }
            value @ (Symbol::Integer(_)
            | Symbol::String(_)
            | Symbol::Boolean(_)
            | Symbol::Dummy
            | Symbol::Error
            | Symbol::Tuple(_)
            | Symbol::Ystar
            | Symbol::Eta(_)
            | Symbol::Partial { .. }) => {
                self.stack.push(value);
                Ok(())
            }
        }
    }

    /// Rule 1
    fn load(&mut self, name: String) -> Result<(), Error> {
        if let Some(value) = self.lookup(&name) {
            let value = value.clone();
            self.stack.push(value);
        } else if find_builtin(&name).is_some() {
            self.stack.push(Symbol::Identifier(name));
        } else {
            return Err(Error::UnboundName(name));
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        let mut index = Some(self.current);
        while let Some(i) = index {
            let env = self.environments.get(i)?;
            if let Some(value) = env.bindings.get(name) {
                return Some(value);
            }
            index = env.parent;
        }
        None
    }

    /// Gamma: dispatch on the applied value (rules 3, 4, 8, 11, 12 and built-ins)
    fn apply(&mut self) -> Result<(), Error> {
        match self.pop_value("gamma")? {
            Symbol::Lambda(lambda) => self.enter(lambda),
            Symbol::Tuple(elements) => self.select(elements),
            Symbol::Ystar => match self.pop_value("Y*")? {
                Symbol::Lambda(lambda) => {
                    self.stack.push(Symbol::Eta(lambda));
                    Ok(())
                }
                other => Err(Error::ApplicationError(format!(
                    "Y* applied to {} '{other}'",
                    other.kind_name()
                ))),
            },
            Symbol::Eta(lambda) => {
                self.control.push(Symbol::Gamma);
                self.control.push(Symbol::Gamma);
                self.stack.push(Symbol::Eta(lambda.clone()));
                self.stack.push(Symbol::Lambda(lambda));
                Ok(())
            }
            Symbol::Identifier(name) => match find_builtin(&name) {
                Some(op) => self.call_builtin(op, Vec::new()),
                None => Err(Error::ApplicationError(format!("'{name}' is not a function"))),
            },
            Symbol::Partial { op, args } => self.call_builtin(op, args),
            other => Err(Error::ApplicationError(format!(
                "cannot apply {} '{other}'",
                other.kind_name()
            ))),
        }
    }

    /// Rules 3 and 4: bind the argument in a fresh environment and run the body
    fn enter(&mut self, lambda: Lambda) -> Result<(), Error> {
        let argument = self.pop_value("gamma")?;
        let parent = lambda.env.ok_or_else(|| {
            Error::StructuralError(format!(
                "lambda {} applied before capturing an environment",
                lambda.id
            ))
        })?;
        let bindings = bind(&lambda, argument)?;

        let index = self.environments.len();
        self.environments.push(Environment {
            index,
            bindings,
            parent: Some(parent),
            caller: Some(self.current),
            removed: false,
        });
        self.control.push(Symbol::EnvMarker(index));
        self.control.push(Symbol::Delta(lambda.body));
        self.stack.push(Symbol::EnvMarker(index));
        self.current = index;
        Ok(())
    }

    /// Rule 5
    fn exit(&mut self, index: usize) -> Result<(), Error> {
        let result = self.pop_value("environment exit")?;
        match self.stack.pop() {
            Some(Symbol::EnvMarker(marker)) if marker == index => {}
            found => {
                return Err(Error::StructuralError(format!(
                    "stack marker mismatch: expected e{index}, found {}",
                    found.map_or_else(|| "empty stack".to_owned(), |s| s.to_string())
                )));
            }
        }
        let env = self.environments.get_mut(index).ok_or_else(|| {
            Error::StructuralError(format!("marker for unknown environment e{index}"))
        })?;
        env.removed = true;
        if let Some(caller) = env.caller {
            self.current = caller;
        }
        self.stack.push(result);
        Ok(())
    }

    /// Rule 8: 1-based tuple selection
    fn select(&mut self, mut elements: Vec<Symbol>) -> Result<(), Error> {
        let index = match self.pop_value("tuple selection")? {
            Symbol::Integer(i) => i,
            other => {
                return Err(Error::TypeMismatch(format!(
                    "tuple selection expects an integer index, got {}",
                    other.kind_name()
                )));
            }
        };
        match usize::try_from(index) {
            Ok(i) if (1..=elements.len()).contains(&i) => {
                self.stack.push(elements.swap_remove(i - 1));
                Ok(())
            }
            _ => Err(Error::index_error(elements.len(), index)),
        }
    }

    /// Rule 10
    fn branch(&mut self) -> Result<(), Error> {
        let condition = match self.pop_value("beta")? {
            Symbol::Boolean(b) => b,
            other => {
                return Err(Error::TypeMismatch(format!(
                    "conditional expects a truthvalue, got {}",
                    other.kind_name()
                )));
            }
        };
        let len = self.control.len();
        if len < 2
            || !matches!(self.control[len - 1], Symbol::Delta(_))
            || !matches!(self.control[len - 2], Symbol::Delta(_))
        {
            return Err(Error::StructuralError(
                "beta is not preceded by its two branches".to_owned(),
            ));
        }
        if condition {
            self.control.pop();
        } else {
            self.control.remove(len - 2);
        }
        Ok(())
    }

    /// Built-ins take one argument per Gamma; until the last one arrives the
    /// machine holds a partial application
    fn call_builtin(&mut self, op: &'static BuiltinOp, mut args: Vec<Symbol>) -> Result<(), Error> {
        args.push(self.pop_value(op.name)?);
        let result = if args.len() < op.arity {
            Symbol::Partial { op, args }
        } else {
            op.invoke(&args, &mut self.output)?
        };
        self.stack.push(result);
        Ok(())
    }

    fn pop_value(&mut self, context: &str) -> Result<Symbol, Error> {
        match self.stack.pop() {
            Some(Symbol::EnvMarker(index)) => Err(Error::StructuralError(format!(
                "{context}: expected a value, found environment marker e{index}"
            ))),
            Some(value) => Ok(value),
            None => Err(Error::StructuralError(format!("{context}: stack underflow"))),
        }
    }
}

/// Bindings for a lambda's parameters: none, one name, or one name per
/// element of a tuple argument
fn bind(lambda: &Lambda, argument: Symbol) -> Result<HashMap<String, Symbol>, Error> {
    match lambda.params.as_ref() {
        [] => Ok(HashMap::new()),
        [name] => Ok(HashMap::from([(name.clone(), argument)])),
        names => match argument {
            Symbol::Tuple(values) if values.len() == names.len() => {
                Ok(names.iter().cloned().zip(values).collect())
            }
            Symbol::Tuple(values) => Err(Error::arity_error_with_context(
                names.len(),
                values.len(),
                format!("tuple parameter ({})", names.join(", ")),
            )),
            // a lone value counts as one argument
            _ => Err(Error::arity_error_with_context(
                names.len(),
                1,
                format!("tuple parameter ({})", names.join(", ")),
            )),
        },
    }
}

/// Evaluate a raw parse tree, writing `Print` output to stdout (public API)
pub fn evaluate(tree: &Node) -> Result<Symbol, Error> {
    evaluate_with_output(tree, &mut io::stdout().lock())
}

/// Standardize, build and run `tree`, writing `Print` output to `output`
pub fn evaluate_with_output<W: Write + ?Sized>(tree: &Node, output: &mut W) -> Result<Symbol, Error> {
    let standardized = standardize(tree)?;
    let state = ControlBuilder::new().initial_state(&standardized)?;
    Machine::new(state, output).run()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Tag, id, int, node};

    #[test]
    fn test_machine_on_canonical_tree() {
        // (fn x . x + 1) 2
        let tree = node(
            Tag::Gamma,
            vec![
                node(
                    Tag::Lambda,
                    vec![id("x"), node(Tag::Binary(BinaryOp::Add), vec![id("x"), int(1)])],
                ),
                int(2),
            ],
        );
        let state = ControlBuilder::new().initial_state(&tree).unwrap();
        let mut machine = Machine::new(state, io::sink());
        assert_eq!(machine.run().unwrap(), Symbol::Integer(3));

        let environments = machine.environments();
        assert_eq!(environments.len(), 2);
        assert_eq!(environments[1].index(), 1);
        assert_eq!(environments[1].parent(), Some(0));
        assert_eq!(environments[1].get_binding("x"), Some(&Symbol::Integer(2)));
        assert!(environments.iter().all(Environment::is_removed));
    }

    #[test]
    fn test_unbound_name_and_bad_application() {
        assert_eq!(evaluate(&id("x")), Err(Error::UnboundName("x".to_owned())));
        // a built-in name on its own is a value
        assert_eq!(
            evaluate(&id("Print")).unwrap(),
            Symbol::Identifier("Print".to_owned())
        );
        assert!(matches!(
            evaluate(&node(Tag::Gamma, vec![int(1), int(2)])),
            Err(Error::ApplicationError(_))
        ));
    }

    #[test]
    fn test_structural_error_before_execution() {
        let mut output = Vec::new();
        let tree = node(
            Tag::Gamma,
            vec![
                node(Tag::Gamma, vec![id("Print"), int(1)]),
                node(Tag::Let, vec![int(1), int(2)]),
            ],
        );
        assert!(matches!(
            evaluate_with_output(&tree, &mut output),
            Err(Error::StructuralError(_))
        ));
        // nothing ran
        assert!(output.is_empty());
    }

    #[cfg(feature = "rpal")]
    mod programs {
        use super::*;
        use crate::rpal::parse_rpal;

        #[derive(Debug)]
        enum TestResult {
            EvalResult(Symbol),
            Error,
            SpecificError(&'static str),
        }
        use TestResult::*;

        fn success<T: Into<Symbol>>(value: T) -> TestResult {
            EvalResult(value.into())
        }

        fn execute_test_case(input: &str, expected: &TestResult, test_id: &str) {
            let tree = match parse_rpal(input) {
                Ok(tree) => tree,
                Err(parse_err) => {
                    panic!("{test_id}: unexpected parse error for '{input}': {parse_err:?}");
                }
            };

            match (evaluate_with_output(&tree, &mut io::sink()), expected) {
                (Ok(actual), EvalResult(expected_val)) => {
                    assert_eq!(actual, *expected_val, "{test_id}: '{input}'");
                }
                (Err(_), Error) => {}
                (Err(e), SpecificError(expected_text)) => {
                    let error_msg = format!("{e}");
                    assert!(
                        error_msg.contains(expected_text),
                        "{test_id}: error should contain '{expected_text}', got: {error_msg}"
                    );
                }
                (Ok(actual), Error | SpecificError(_)) => {
                    panic!("{test_id}: expected error for '{input}', got {actual:?}");
                }
                (Err(err), EvalResult(expected_val)) => {
                    panic!("{test_id}: expected {expected_val:?}, got error {err:?}");
                }
            }
        }

        fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
            for (i, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("#{}", i + 1);
                execute_test_case(input, expected, &test_id);
            }
        }

        #[test]
        fn test_comprehensive_programs_data_driven() {
            let test_cases = vec![
                // === LITERALS ===
                ("42", success(42i64)),
                ("'hello'", success("hello")),
                ("true", success(true)),
                ("nil", EvalResult(Symbol::nil())),
                ("dummy", EvalResult(Symbol::Dummy)),
                // === ARITHMETIC ===
                ("let x = 3 in x + 4", success(7i64)),
                ("let x = 5 in x - 3", success(2i64)),
                ("8 / 2 / 2", success(2i64)),
                ("2 ** 3 ** 2", success(512i64)),
                ("-3 + 5", success(2i64)),
                ("2 * 3 + 4 * 5", success(26i64)),
                ("1 / 0", SpecificError("Division by zero")),
                ("9223372036854775807 + 1", SpecificError("overflow")),
                ("1 + true", SpecificError("TypeMismatchError")),
                // === COMPARISON AND LOGIC ===
                ("3 gr 2", success(true)),
                ("3 < 2", success(false)),
                ("2 le 2", success(true)),
                ("not true or false", success(false)),
                ("true & not false", success(true)),
                ("'abc' eq 'abc'", success(true)),
                ("1 ne 2", success(true)),
                // === CONDITIONALS ===
                ("(1 eq 1) -> 10 | 20", success(10i64)),
                ("(1 eq 2) -> 10 | 20", success(20i64)),
                ("1 -> 10 | 20", SpecificError("truthvalue")),
                // === FUNCTIONS ===
                ("(fn x y . x + y) 3 4", success(7i64)),
                ("(fn (x, y) . x + y) (3, 4)", success(7i64)),
                ("(fn (x, y) . x + y) (3, 4, 5)", SpecificError("ArityMismatchError")),
                ("(fn (x, y) . x + y) 3", SpecificError("tuple parameter (x, y): expected 2, got 1")),
                ("let f () = 5 in f dummy", success(5i64)),
                ("let add x y = x + y in let inc = add 1 in (inc 5, add 10 20)", success(vec![6i64, 30])),
                ("let mul x y = x * y in 2 @mul 5", success(10i64)),
                ("x", SpecificError("UnboundNameError: x")),
                ("1 2", SpecificError("ApplicationError")),
                // === DEFINITIONS ===
                ("let a = 1 and b = 2 in a + b", success(3i64)),
                ("let a = 1 within b = a + 1 in b", success(2i64)),
                ("x + 1 where x = 4", success(5i64)),
                ("let a, b = 1, 2 in b", success(2i64)),
                // === RECURSION ===
                (
                    "let rec F x = (x eq 0) -> 1 | x * (F (x - 1)) in F 5",
                    success(120i64),
                ),
                (
                    "let rec fib n = n ls 2 -> n | fib (n - 1) + fib (n - 2) in fib 10",
                    success(55i64),
                ),
                (
                    "let rec len S = S eq '' -> 0 | 1 + len (Stern S) in len 'hello'",
                    success(5i64),
                ),
                // === TUPLES ===
                ("(3, 4, 5) 2", success(4i64)),
                ("(3, 4, 5) 0", SpecificError("ArityMismatchError: tuple index 0 out of range 1..=3")),
                ("(3, 4, 5) (-1)", SpecificError("tuple index -1 out of range 1..=3")),
                ("(3, 4, 5) 4", SpecificError("ArityMismatchError")),
                ("(3, 4, 5) 'a'", SpecificError("TypeMismatchError")),
                ("nil aug 1 aug 2", success(vec![1i64, 2])),
                ("let t = (1, 2) aug 3 in Order t", success(3i64)),
                ("1 aug 2", Error),
                // === BUILT-INS ===
                ("Order (1, 2, 3)", success(3i64)),
                ("Conc 'ab' 'cd'", success("abcd")),
                ("Stem 'abc'", success("a")),
                ("Null nil", success(true)),
                ("Itos 12", success("12")),
                ("Itos 'a'", EvalResult(Symbol::Error)),
                ("Isinteger 3", success(true)),
                ("Istuple (1, 2)", success(true)),
                ("Isfunction (fn x . x)", success(true)),
                ("Isfunction Order", success(true)),
                ("let c = Conc 'ab' in c 'cd'", success("abcd")),
                ("let f x = Conc x in f 'ab' 'cd'", success("abcd")),
                ("let Pre = Conc '> ' in (Pre 'a', Pre 'b')", success(vec!["> a", "> b"])),
                ("Isfunction (Conc 'a')", success(true)),
                ("Conc 'ab' 3", SpecificError("Conc expects a string")),
            ];

            run_comprehensive_tests(test_cases);
        }

        #[test]
        fn test_sibling_calls_do_not_share_bindings() {
            let test_cases = vec![
                ("let f x = x * 2 in (f 3, f 4)", success(vec![6i64, 8])),
                (
                    "let make n = fn x . n + x in let a = make 1 in let b = make 10 in (a 1, b 1, a 2)",
                    success(vec![2i64, 11, 3]),
                ),
                // the inner x shadows the outer one only inside the call
                ("let x = 1 in (let x = 2 in x) + x", success(3i64)),
            ];
            run_comprehensive_tests(test_cases);
        }

        #[test]
        fn test_closure_display() {
            let tree = parse_rpal("fn x . x").unwrap();
            let result = evaluate_with_output(&tree, &mut io::sink()).unwrap();
            assert_eq!(format!("{result}"), "[lambda closure: x: 1]");

            // a recursive function escapes as the Eta wrapping its Y* lambda
            let tree = parse_rpal("let rec f n = f n in f").unwrap();
            let result = evaluate_with_output(&tree, &mut io::sink()).unwrap();
            assert_eq!(format!("{result}"), "[eta closure: f: 2]");
        }
    }
}
