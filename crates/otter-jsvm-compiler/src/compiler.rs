//! Main compiler implementation

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};

use otter_jsvm_bytecode::{BinaryOp, ConstantIndex, Instruction, UnaryOp};

use crate::codegen::{CodeGen, JumpKind};
use crate::error::{CompileError, CompileResult, line_column};

/// The compiler
///
/// Scripts are compiled as classic scripts: every top-level binding is a
/// property of the global object.
#[derive(Debug, Default, Clone, Copy)]
pub struct Compiler;

impl Compiler {
    /// Create a new compiler
    pub fn new() -> Self {
        Self
    }

    /// Compile source code to a program
    pub fn compile(
        self,
        source: &str,
        source_url: &str,
    ) -> CompileResult<otter_jsvm_bytecode::Program> {
        let allocator = Allocator::default();
        let program = parse(&allocator, source)?;

        let mut lowering = Lowering {
            codegen: CodeGen::new(source_url, source),
            source,
        };
        lowering.compile_program(&program)?;

        Ok(lowering.codegen.finish())
    }

    /// Parse `source` without generating code
    pub fn check_syntax(self, source: &str) -> CompileResult<()> {
        let allocator = Allocator::default();
        parse(&allocator, source).map(|_| ())
    }
}

fn parse<'a>(allocator: &'a Allocator, source: &'a str) -> CompileResult<Program<'a>> {
    let source_type = SourceType::default().with_script(true);
    let result = Parser::new(allocator, source, source_type).parse();

    if let Some(error) = result.errors.first() {
        return Err(CompileError::Parse(error.to_string()));
    }
    if result.panicked {
        return Err(CompileError::Parse("Unexpected end of input".to_string()));
    }

    Ok(result.program)
}

/// AST walker for a single script
struct Lowering<'s> {
    codegen: CodeGen,
    source: &'s str,
}

impl Lowering<'_> {
    fn unsupported(&self, feature: &str, span: Span) -> CompileError {
        let (line, column) = line_column(self.source, span.start);
        CompileError::unsupported(feature, line, column)
    }

    /// Compile a program
    fn compile_program(&mut self, program: &Program) -> CompileResult<()> {
        let strict = program
            .directives
            .iter()
            .any(|d| d.directive.as_str() == "use strict");
        self.codegen.set_strict(strict);

        // `var` bindings exist before any statement runs
        let mut names = Vec::new();
        for stmt in &program.body {
            collect_var_names(stmt, &mut names);
        }
        for name in names {
            let name = self.codegen.add_string(name)?;
            self.codegen.emit(Instruction::DeclareGlobal { name });
        }

        // A directive prologue still produces a completion value
        for directive in &program.directives {
            let idx = self.codegen.add_string(&directive.expression.value)?;
            self.codegen.emit(Instruction::LoadConst { idx });
            self.codegen.emit(Instruction::SetCompletion);
        }

        for stmt in &program.body {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    /// Compile a statement
    fn compile_statement(&mut self, stmt: &Statement) -> CompileResult<()> {
        match stmt {
            Statement::ExpressionStatement(expr_stmt) => {
                self.compile_expression(&expr_stmt.expression)?;
                self.codegen.emit(Instruction::SetCompletion);
                Ok(())
            }

            Statement::VariableDeclaration(decl) => self.compile_variable_declaration(decl),

            Statement::BlockStatement(block) => {
                for stmt in &block.body {
                    self.compile_statement(stmt)?;
                }
                Ok(())
            }

            Statement::IfStatement(if_stmt) => self.compile_if_statement(if_stmt),

            Statement::EmptyStatement(_) => Ok(()),

            Statement::ThrowStatement(throw_stmt) => {
                self.compile_expression(&throw_stmt.argument)?;
                self.codegen.emit(Instruction::Throw);
                Ok(())
            }

            Statement::FunctionDeclaration(f) => Err(self.unsupported("function declaration", f.span)),
            Statement::ClassDeclaration(c) => Err(self.unsupported("class declaration", c.span)),
            Statement::WhileStatement(s) => Err(self.unsupported("while statement", s.span)),
            Statement::DoWhileStatement(s) => Err(self.unsupported("do-while statement", s.span)),
            Statement::ForStatement(s) => Err(self.unsupported("for statement", s.span)),
            Statement::ForInStatement(s) => Err(self.unsupported("for-in statement", s.span)),
            Statement::ForOfStatement(s) => Err(self.unsupported("for-of statement", s.span)),
            Statement::TryStatement(s) => Err(self.unsupported("try statement", s.span)),
            Statement::SwitchStatement(s) => Err(self.unsupported("switch statement", s.span)),
            other => Err(self.unsupported("statement", other.span())),
        }
    }

    /// Compile a variable declaration
    ///
    /// `let` and `const` share `var` semantics at script top level here: the
    /// binding becomes a global property.
    fn compile_variable_declaration(&mut self, decl: &VariableDeclaration) -> CompileResult<()> {
        for declarator in &decl.declarations {
            match &declarator.id {
                BindingPattern::BindingIdentifier(ident) => {
                    let name = self.codegen.add_string(&ident.name)?;
                    if decl.kind != VariableDeclarationKind::Var {
                        self.codegen.emit(Instruction::DeclareGlobal { name });
                    }

                    match &declarator.init {
                        Some(init) => self.compile_expression(init)?,
                        None if decl.kind == VariableDeclarationKind::Var => continue,
                        None => self.codegen.emit(Instruction::LoadUndefined),
                    }
                    self.codegen.emit(Instruction::SetGlobal { name });
                    self.codegen.emit(Instruction::Pop);
                }
                other => return Err(self.unsupported("destructuring pattern", other.span())),
            }
        }

        Ok(())
    }

    /// Compile an if statement
    fn compile_if_statement(&mut self, if_stmt: &IfStatement) -> CompileResult<()> {
        self.compile_expression(&if_stmt.test)?;
        let jump_else = self.codegen.emit_jump(JumpKind::IfFalse);

        self.compile_statement(&if_stmt.consequent)?;

        if let Some(alternate) = &if_stmt.alternate {
            let jump_end = self.codegen.emit_jump(JumpKind::Always);
            self.codegen.patch_jump_here(jump_else)?;
            self.compile_statement(alternate)?;
            self.codegen.patch_jump_here(jump_end)?;
        } else {
            self.codegen.patch_jump_here(jump_else)?;
        }

        Ok(())
    }

    /// Compile an expression, leaving its value on the stack
    fn compile_expression(&mut self, expr: &Expression) -> CompileResult<()> {
        match expr {
            Expression::NumericLiteral(lit) => {
                let value = lit.value;
                if value.fract() == 0.0
                    && value >= i32::MIN as f64
                    && value <= i32::MAX as f64
                    && !(value == 0.0 && value.is_sign_negative())
                {
                    self.codegen.emit(Instruction::LoadInt32 {
                        value: value as i32,
                    });
                } else {
                    let idx = self.codegen.add_number(value)?;
                    self.codegen.emit(Instruction::LoadConst { idx });
                }
            }

            Expression::StringLiteral(lit) => {
                let idx = self.codegen.add_string(&lit.value)?;
                self.codegen.emit(Instruction::LoadConst { idx });
            }

            Expression::BooleanLiteral(lit) => {
                self.codegen.emit(if lit.value {
                    Instruction::LoadTrue
                } else {
                    Instruction::LoadFalse
                });
            }

            Expression::NullLiteral(_) => self.codegen.emit(Instruction::LoadNull),

            Expression::ThisExpression(_) => self.codegen.emit(Instruction::LoadThis),

            Expression::Identifier(ident) => {
                let name = self.codegen.add_string(&ident.name)?;
                self.codegen.emit(Instruction::GetGlobal { name });
            }

            Expression::BinaryExpression(binary) => self.compile_binary_expression(binary)?,

            Expression::LogicalExpression(logical) => self.compile_logical_expression(logical)?,

            Expression::UnaryExpression(unary) => self.compile_unary_expression(unary)?,

            Expression::AssignmentExpression(assign) => {
                self.compile_assignment_expression(assign)?
            }

            Expression::CallExpression(call) => self.compile_call_expression(call)?,

            Expression::NewExpression(new_expr) => self.compile_new_expression(new_expr)?,

            Expression::StaticMemberExpression(member) => {
                self.compile_expression(&member.object)?;
                let name = self.codegen.add_string(&member.property.name)?;
                self.codegen.emit(Instruction::GetProp { name });
            }

            Expression::ComputedMemberExpression(member) => {
                self.compile_expression(&member.object)?;
                self.compile_expression(&member.expression)?;
                self.codegen.emit(Instruction::GetElem);
            }

            Expression::ObjectExpression(obj) => self.compile_object_expression(obj)?,

            Expression::ArrayExpression(arr) => self.compile_array_expression(arr)?,

            Expression::ConditionalExpression(cond) => {
                self.compile_conditional_expression(cond)?
            }

            Expression::SequenceExpression(seq) => {
                let last = seq.expressions.len().saturating_sub(1);
                for (i, expr) in seq.expressions.iter().enumerate() {
                    self.compile_expression(expr)?;
                    if i != last {
                        self.codegen.emit(Instruction::Pop);
                    }
                }
            }

            Expression::ParenthesizedExpression(paren) => {
                self.compile_expression(&paren.expression)?
            }

            Expression::FunctionExpression(f) => {
                return Err(self.unsupported("function expression", f.span));
            }
            Expression::ArrowFunctionExpression(f) => {
                return Err(self.unsupported("arrow function", f.span));
            }
            Expression::TemplateLiteral(t) => {
                return Err(self.unsupported("template literal", t.span));
            }
            Expression::UpdateExpression(u) => {
                return Err(self.unsupported("update expression", u.span));
            }
            other => return Err(self.unsupported("expression", other.span())),
        }
        Ok(())
    }

    /// Compile a binary expression
    fn compile_binary_expression(&mut self, binary: &BinaryExpression) -> CompileResult<()> {
        let op = match binary.operator {
            BinaryOperator::Addition => BinaryOp::Add,
            BinaryOperator::Subtraction => BinaryOp::Sub,
            BinaryOperator::Multiplication => BinaryOp::Mul,
            BinaryOperator::Division => BinaryOp::Div,
            BinaryOperator::Remainder => BinaryOp::Mod,
            BinaryOperator::Exponential => BinaryOp::Pow,
            BinaryOperator::LessThan => BinaryOp::Lt,
            BinaryOperator::LessEqualThan => BinaryOp::Le,
            BinaryOperator::GreaterThan => BinaryOp::Gt,
            BinaryOperator::GreaterEqualThan => BinaryOp::Ge,
            BinaryOperator::Equality => BinaryOp::Eq,
            BinaryOperator::Inequality => BinaryOp::Ne,
            BinaryOperator::StrictEquality => BinaryOp::StrictEq,
            BinaryOperator::StrictInequality => BinaryOp::StrictNe,
            BinaryOperator::BitwiseAnd => BinaryOp::BitAnd,
            BinaryOperator::BitwiseOR => BinaryOp::BitOr,
            BinaryOperator::BitwiseXOR => BinaryOp::BitXor,
            BinaryOperator::ShiftLeft => BinaryOp::Shl,
            BinaryOperator::ShiftRight => BinaryOp::Shr,
            BinaryOperator::ShiftRightZeroFill => BinaryOp::Ushr,
            BinaryOperator::Instanceof => BinaryOp::InstanceOf,
            BinaryOperator::In => BinaryOp::In,
        };

        self.compile_expression(&binary.left)?;
        self.compile_expression(&binary.right)?;
        self.codegen.emit(Instruction::Binary { op });
        Ok(())
    }

    /// Compile `&&`, `||` and `??`
    ///
    /// The left value is kept when it decides the result, otherwise it is
    /// dropped and the right side is evaluated in its place.
    fn compile_logical_expression(&mut self, logical: &LogicalExpression) -> CompileResult<()> {
        let kind = match logical.operator {
            LogicalOperator::And => JumpKind::IfFalse,
            LogicalOperator::Or => JumpKind::IfTrue,
            LogicalOperator::Coalesce => JumpKind::IfNotNullish,
        };

        self.compile_expression(&logical.left)?;
        self.codegen.emit(Instruction::Dup);
        let jump_end = self.codegen.emit_jump(kind);
        self.codegen.emit(Instruction::Pop);
        self.compile_expression(&logical.right)?;
        self.codegen.patch_jump_here(jump_end)
    }

    /// Compile a unary expression
    fn compile_unary_expression(&mut self, unary: &UnaryExpression) -> CompileResult<()> {
        let op = match unary.operator {
            UnaryOperator::UnaryNegation => UnaryOp::Neg,
            UnaryOperator::UnaryPlus => UnaryOp::ToNumber,
            UnaryOperator::LogicalNot => UnaryOp::Not,
            UnaryOperator::BitwiseNot => UnaryOp::BitNot,
            UnaryOperator::Typeof => {
                if let Expression::Identifier(ident) = &unary.argument {
                    let name = self.codegen.add_string(&ident.name)?;
                    self.codegen.emit(Instruction::TypeOfGlobal { name });
                    return Ok(());
                }
                UnaryOp::TypeOf
            }
            UnaryOperator::Void => {
                self.compile_expression(&unary.argument)?;
                self.codegen.emit(Instruction::Pop);
                self.codegen.emit(Instruction::LoadUndefined);
                return Ok(());
            }
            UnaryOperator::Delete => return self.compile_delete(unary),
        };

        self.compile_expression(&unary.argument)?;
        self.codegen.emit(Instruction::Unary { op });
        Ok(())
    }

    fn compile_delete(&mut self, unary: &UnaryExpression) -> CompileResult<()> {
        match &unary.argument {
            Expression::StaticMemberExpression(member) => {
                self.compile_expression(&member.object)?;
                let name = self.codegen.add_string(&member.property.name)?;
                self.codegen.emit(Instruction::DeleteProp { name });
            }
            Expression::ComputedMemberExpression(member) => {
                self.compile_expression(&member.object)?;
                self.compile_expression(&member.expression)?;
                self.codegen.emit(Instruction::DeleteElem);
            }
            Expression::Identifier(ident) => {
                return Err(self.unsupported("delete of an identifier", ident.span));
            }
            other => {
                self.compile_expression(other)?;
                self.codegen.emit(Instruction::Pop);
                self.codegen.emit(Instruction::LoadTrue);
            }
        }
        Ok(())
    }

    /// Compile an assignment expression
    fn compile_assignment_expression(
        &mut self,
        assign: &AssignmentExpression,
    ) -> CompileResult<()> {
        let op = match assign.operator {
            AssignmentOperator::Assign => None,
            AssignmentOperator::Addition => Some(BinaryOp::Add),
            AssignmentOperator::Subtraction => Some(BinaryOp::Sub),
            AssignmentOperator::Multiplication => Some(BinaryOp::Mul),
            AssignmentOperator::Division => Some(BinaryOp::Div),
            AssignmentOperator::Remainder => Some(BinaryOp::Mod),
            AssignmentOperator::Exponential => Some(BinaryOp::Pow),
            AssignmentOperator::ShiftLeft => Some(BinaryOp::Shl),
            AssignmentOperator::ShiftRight => Some(BinaryOp::Shr),
            AssignmentOperator::ShiftRightZeroFill => Some(BinaryOp::Ushr),
            AssignmentOperator::BitwiseOR => Some(BinaryOp::BitOr),
            AssignmentOperator::BitwiseXOR => Some(BinaryOp::BitXor),
            AssignmentOperator::BitwiseAnd => Some(BinaryOp::BitAnd),
            _ => return Err(self.unsupported("logical assignment", assign.span)),
        };

        match &assign.left {
            AssignmentTarget::AssignmentTargetIdentifier(ident) => {
                let name = self.codegen.add_string(&ident.name)?;
                if let Some(op) = op {
                    self.codegen.emit(Instruction::GetGlobal { name });
                    self.compile_expression(&assign.right)?;
                    self.codegen.emit(Instruction::Binary { op });
                } else {
                    self.compile_expression(&assign.right)?;
                }
                self.codegen.emit(Instruction::SetGlobal { name });
            }
            AssignmentTarget::StaticMemberExpression(member) => {
                self.compile_expression(&member.object)?;
                let name = self.codegen.add_string(&member.property.name)?;
                if let Some(op) = op {
                    self.codegen.emit(Instruction::Dup);
                    self.codegen.emit(Instruction::GetProp { name });
                    self.compile_expression(&assign.right)?;
                    self.codegen.emit(Instruction::Binary { op });
                } else {
                    self.compile_expression(&assign.right)?;
                }
                self.codegen.emit(Instruction::SetProp { name });
            }
            AssignmentTarget::ComputedMemberExpression(member) => {
                self.compile_expression(&member.object)?;
                self.compile_expression(&member.expression)?;
                if let Some(op) = op {
                    self.codegen.emit(Instruction::Dup2);
                    self.codegen.emit(Instruction::GetElem);
                    self.compile_expression(&assign.right)?;
                    self.codegen.emit(Instruction::Binary { op });
                } else {
                    self.compile_expression(&assign.right)?;
                }
                self.codegen.emit(Instruction::SetElem);
            }
            other => return Err(self.unsupported("assignment target", other.span())),
        }

        Ok(())
    }

    /// Compile a call expression
    ///
    /// Member calls keep the receiver on the stack as `this`.
    fn compile_call_expression(&mut self, call: &CallExpression) -> CompileResult<()> {
        if call.optional {
            return Err(self.unsupported("optional call", call.span));
        }

        match &call.callee {
            Expression::StaticMemberExpression(member) => {
                self.compile_expression(&member.object)?;
                self.codegen.emit(Instruction::Dup);
                let name = self.codegen.add_string(&member.property.name)?;
                self.codegen.emit(Instruction::GetProp { name });
            }
            Expression::ComputedMemberExpression(member) => {
                self.compile_expression(&member.object)?;
                self.codegen.emit(Instruction::Dup);
                self.compile_expression(&member.expression)?;
                self.codegen.emit(Instruction::GetElem);
            }
            callee => {
                self.codegen.emit(Instruction::LoadUndefined);
                self.compile_expression(callee)?;
            }
        }

        let argc = self.compile_arguments(&call.arguments, call.span)?;
        let callee = self.callee_name(&call.callee)?;
        self.codegen.emit(Instruction::Call { argc, callee });
        Ok(())
    }

    /// Compile a `new` expression
    fn compile_new_expression(&mut self, new_expr: &NewExpression) -> CompileResult<()> {
        self.compile_expression(&new_expr.callee)?;
        let argc = self.compile_arguments(&new_expr.arguments, new_expr.span)?;
        let callee = self.callee_name(&new_expr.callee)?;
        self.codegen.emit(Instruction::Construct { argc, callee });
        Ok(())
    }

    fn compile_arguments(&mut self, arguments: &[Argument], span: Span) -> CompileResult<u16> {
        let argc =
            u16::try_from(arguments.len()).map_err(|_| self.unsupported("argument list", span))?;
        for arg in arguments {
            match arg {
                Argument::SpreadElement(spread) => {
                    return Err(self.unsupported("spread argument", spread.span));
                }
                _ => match arg.as_expression() {
                    Some(expr) => self.compile_expression(expr)?,
                    None => return Err(self.unsupported("argument", span)),
                },
            }
        }
        Ok(argc)
    }

    /// Source text of a simple callee path, used in "is not a function" errors
    fn callee_name(&mut self, callee: &Expression) -> CompileResult<Option<ConstantIndex>> {
        match path_name(callee) {
            Some(name) => Ok(Some(self.codegen.add_string(&name)?)),
            None => Ok(None),
        }
    }

    /// Compile an object expression
    fn compile_object_expression(&mut self, obj: &ObjectExpression) -> CompileResult<()> {
        self.codegen.emit(Instruction::NewObject);

        for prop in &obj.properties {
            match prop {
                ObjectPropertyKind::ObjectProperty(prop) => {
                    if prop.kind != PropertyKind::Init || prop.method {
                        return Err(self.unsupported("accessor or method property", prop.span));
                    }

                    let key = match &prop.key {
                        PropertyKey::StaticIdentifier(ident) => Some(ident.name.to_string()),
                        PropertyKey::StringLiteral(lit) => Some(lit.value.to_string()),
                        PropertyKey::NumericLiteral(lit) => Some(number_key(lit.value)),
                        _ => None,
                    };

                    match key {
                        Some(key) => {
                            let name = self.codegen.add_string(&key)?;
                            self.compile_expression(&prop.value)?;
                            self.codegen.emit(Instruction::DefineField { name });
                        }
                        None => {
                            let Some(key) = prop.key.as_expression() else {
                                return Err(self.unsupported("property key", prop.span));
                            };
                            self.codegen.emit(Instruction::Dup);
                            self.compile_expression(key)?;
                            self.compile_expression(&prop.value)?;
                            self.codegen.emit(Instruction::SetElem);
                            self.codegen.emit(Instruction::Pop);
                        }
                    }
                }
                ObjectPropertyKind::SpreadProperty(spread) => {
                    return Err(self.unsupported("object spread", spread.span));
                }
            }
        }

        Ok(())
    }

    /// Compile an array expression
    fn compile_array_expression(&mut self, arr: &ArrayExpression) -> CompileResult<()> {
        let len = u32::try_from(arr.elements.len())
            .map_err(|_| self.unsupported("array literal", arr.span))?;

        for elem in &arr.elements {
            match elem {
                ArrayExpressionElement::SpreadElement(spread) => {
                    return Err(self.unsupported("array spread", spread.span));
                }
                ArrayExpressionElement::Elision(_) => self.codegen.emit(Instruction::LoadHole),
                _ => self.compile_expression(elem.to_expression())?,
            }
        }

        self.codegen.emit(Instruction::NewArray { len });
        Ok(())
    }

    /// Compile a conditional (ternary) expression
    fn compile_conditional_expression(
        &mut self,
        cond: &ConditionalExpression,
    ) -> CompileResult<()> {
        self.compile_expression(&cond.test)?;
        let jump_else = self.codegen.emit_jump(JumpKind::IfFalse);

        self.compile_expression(&cond.consequent)?;
        let jump_end = self.codegen.emit_jump(JumpKind::Always);

        self.codegen.patch_jump_here(jump_else)?;
        self.compile_expression(&cond.alternate)?;
        self.codegen.patch_jump_here(jump_end)
    }
}

/// Collect `var` names declared anywhere in `stmt` outside of functions
fn collect_var_names<'a>(stmt: &'a Statement, names: &mut Vec<&'a str>) {
    match stmt {
        Statement::VariableDeclaration(decl) if decl.kind == VariableDeclarationKind::Var => {
            for declarator in &decl.declarations {
                if let BindingPattern::BindingIdentifier(ident) = &declarator.id
                    && !names.contains(&ident.name.as_str())
                {
                    names.push(ident.name.as_str());
                }
            }
        }
        Statement::BlockStatement(block) => {
            for stmt in &block.body {
                collect_var_names(stmt, names);
            }
        }
        Statement::IfStatement(if_stmt) => {
            collect_var_names(&if_stmt.consequent, names);
            if let Some(alternate) = &if_stmt.alternate {
                collect_var_names(alternate, names);
            }
        }
        _ => {}
    }
}

fn path_name(expr: &Expression) -> Option<String> {
    match expr {
        Expression::Identifier(ident) => Some(ident.name.to_string()),
        Expression::ThisExpression(_) => Some("this".to_string()),
        Expression::StaticMemberExpression(member) => {
            path_name(&member.object).map(|obj| format!("{}.{}", obj, member.property.name))
        }
        Expression::ParenthesizedExpression(paren) => path_name(&paren.expression),
        _ => None,
    }
}

fn number_key(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
