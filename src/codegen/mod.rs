//! Generación de código AVR.
//!
//! El árbol sintáctico se recorre una sola vez. Cada sentencia se
//! traduce a cero o más instrucciones que se emiten, idénticas, a todos
//! los backends activos por medio de [`Outputs`]. Las etiquetas
//! sintetizadas llevan el nombre del procedimiento, el sufijo de cada
//! expansión inline activa, la clase de construcción y la línea de
//! origen, como en `main_inl0@loop@12`.

use crate::{
    arch::{Instruction, LabelRef, Mnemonic, Operand},
    ast::{
        Alias, Call, DataBlock, Expr, Item, PrefixOp, Procedure, Program, Statement, SuffixOp,
        VarDecl,
    },
    device::Device,
    error::{BudgetError, Compiled, Locate, SemanticError, Warning},
    output::{Linkage, Outputs},
    source::{Located, Location},
};

use std::{collections::HashMap, rc::Rc};

macro_rules! op {
    ($context:expr, $location:expr, $mnemonic:ident $(, $operand:expr)*) => {
        $context.emit(
            $crate::arch::Mnemonic::$mnemonic,
            vec![$(::std::convert::Into::<$crate::arch::Operand>::into($operand)),*],
            $location,
        )
    };
}

mod arith;
mod assign;
mod cond;
mod data;
mod fold;
mod instr;
mod loops;
mod resolve;

use resolve::{ExternVar, Value, Variable};

/// Traduce un programa completo.
///
/// Las advertencias se devuelven aparte; cualquier error detiene la
/// compilación en la primera ocurrencia.
pub fn compile<'a>(
    program: &'a Program,
    device: &'a Device,
    outputs: &'a mut Outputs,
) -> Compiled<Vec<Located<Warning>>> {
    let mut context = Context::new(device, outputs);

    context.declare_procedures(&program.items)?;
    if let Some(vectors) = &program.vectors {
        context.vectors(vectors)?;
    }

    for item in &program.items {
        context.item(item)?;
    }

    context.reject_org()?;
    Ok(context.warnings)
}

/// Pin físico de un puerto.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Pin {
    port: char,
    bit: u8,
}

struct Frame<'a> {
    procedure: &'a Procedure,
    scopes: Vec<HashMap<Rc<str>, &'a Located<Expr>>>,
}

struct Expansion<'a> {
    procedure: &'a Procedure,
    suffix: String,
}

/// Destinos de `continue` y `break` del ciclo más interno.
struct LoopLabels {
    next: Rc<str>,
    end: Rc<str>,
}

struct Context<'a> {
    device: &'a Device,
    outputs: &'a mut Outputs,
    procedures: HashMap<Rc<str>, &'a Procedure>,
    extern_procedures: HashMap<Rc<str>, &'a Procedure>,
    variables: HashMap<Rc<str>, Variable>,
    extern_vars: HashMap<Rc<str>, ExternVar>,
    pins: HashMap<Rc<str>, Pin>,
    aliases: HashMap<Rc<str>, &'a Located<Expr>>,
    frame: Option<Frame<'a>>,
    expansions: Vec<Expansion<'a>>,
    loops: Vec<LoopLabels>,
    pending_org: Option<Located<u32>>,
    ram_cursor: u32,
    instructions: usize,
    probes: usize,
    inlined: usize,
    comment: Option<Rc<str>>,
    warnings: Vec<Located<Warning>>,
}

impl<'a> Context<'a> {
    fn new(device: &'a Device, outputs: &'a mut Outputs) -> Self {
        Context {
            device,
            outputs,
            procedures: HashMap::new(),
            extern_procedures: HashMap::new(),
            variables: HashMap::new(),
            extern_vars: HashMap::new(),
            pins: HashMap::new(),
            aliases: HashMap::new(),
            frame: None,
            expansions: Vec::new(),
            loops: Vec::new(),
            pending_org: None,
            ram_cursor: 0,
            instructions: 0,
            probes: 0,
            inlined: 0,
            comment: None,
            warnings: Vec::new(),
        }
    }

    /// Emite una instrucción a todos los backends.
    fn emit(
        &mut self,
        mnemonic: Mnemonic,
        operands: Vec<Operand>,
        location: &Location,
    ) -> Compiled<()> {
        let instruction = Instruction::new(mnemonic, operands)
            .map_err(|error| error.at(location))?
            .with_comment(self.comment.clone());

        log::trace!("{}", instruction);

        self.instructions += 1;
        self.outputs
            .instruction(Located::at(instruction, location.clone()));

        Ok(())
    }

    fn define(&mut self, name: Rc<str>, location: &Location) -> Compiled<()> {
        self.outputs.label(name, location)
    }

    fn warn(&mut self, warning: Warning, location: &Location) {
        log::debug!("warning at {}: {}", location, warning);
        self.warnings.push(Located::at(warning, location.clone()));
    }

    /// Nombre del procedimiento actual más los sufijos de expansión.
    fn prefix(&self) -> String {
        let mut prefix = match &self.frame {
            Some(frame) => frame.procedure.name.val().to_string(),
            None => String::new(),
        };

        for expansion in &self.expansions {
            prefix.push_str(&expansion.suffix);
        }

        prefix
    }

    /// Etiqueta sintetizada para una construcción de la línea dada.
    fn generated(&self, kind: &str, location: &Location) -> Rc<str> {
        format!("{}@{}@{}", self.prefix(), kind, location.start().line()).into()
    }

    /// Referencia a una etiqueta escrita por el usuario.
    ///
    /// Dentro de un procedimiento se prefiere la etiqueta local.
    fn label_ref(&self, name: &Rc<str>) -> LabelRef {
        match &self.frame {
            Some(_) => {
                let local = format!("{}@{}", self.prefix(), name);
                LabelRef::scoped(local.into(), Rc::clone(name))
            }

            None => LabelRef::global(Rc::clone(name)),
        }
    }

    fn declare_procedures(&mut self, items: &'a [Located<Item>]) -> Compiled<()> {
        for item in items {
            let (procedure, external) = match item.val() {
                Item::Procedure(procedure) => (procedure, false),
                Item::ExternProcedure(procedure) => (procedure, true),
                _ => continue,
            };

            let name = procedure.name.val();
            let location = procedure.name.location();

            if self.procedures.contains_key(name) || self.extern_procedures.contains_key(name) {
                let error = SemanticError::ProcedureAlreadyDefined(name.to_string());
                return Err(error.at(location));
            }

            if external {
                if !self.outputs.links_externals() {
                    return Err(SemanticError::ExternalOutsideGcc.at(location));
                }

                self.outputs.declare(Rc::clone(name), Linkage::Extern);
                self.extern_procedures.insert(Rc::clone(name), procedure);
            } else {
                self.procedures.insert(Rc::clone(name), procedure);
            }
        }

        Ok(())
    }

    fn item(&mut self, item: &'a Located<Item>) -> Compiled<()> {
        let location = item.location();

        match item.val() {
            Item::Directive { name, args } => self.directive(name, args),
            Item::Procedure(procedure) => self.procedure(procedure),
            Item::ExternProcedure(_) => self.reject_org(),
            Item::Var(decl) => self.var(decl),
            Item::ExternVar(decl) => self.extern_var(decl),
            Item::Pin { name, pin } => self.pin(name, pin),
            Item::Use(alias) => self.global_alias(alias),

            Item::Label(name) => {
                self.place_code()?;
                self.define(Rc::clone(name), location)
            }

            Item::Data(block) => {
                self.place_code()?;
                self.data(block, location)
            }
        }
    }

    fn directive(&mut self, name: &Located<Rc<str>>, args: &'a [Located<Expr>]) -> Compiled<()> {
        let location = name.location();
        match (&**name.val(), args) {
            ("org", [arg]) => {
                self.reject_org()?;

                let origin = self.constant(arg)?;
                if origin < 0 {
                    return Err(SemanticError::WrongOrg(origin).at(arg.location()));
                }

                self.pending_org = Some(Located::at(origin as u32, location.clone()));
                Ok(())
            }

            (name, _) => Err(SemanticError::InvalidDirective(name.to_string()).at(location)),
        }
    }

    /// Un `org` pendiente que nada consume es un error.
    fn reject_org(&mut self) -> Compiled<()> {
        match self.pending_org.take() {
            Some(org) => Err(SemanticError::InvalidDirective("org".into()).at(org.location())),
            None => Ok(()),
        }
    }

    /// Aplica un `org` pendiente al espacio de código.
    fn place_code(&mut self) -> Compiled<()> {
        if let Some(org) = self.pending_org.take() {
            let (location, origin) = org.split();
            if origin % 2 != 0 {
                return Err(SemanticError::WrongOrg(origin as i32).at(&location));
            }

            log::debug!("code origin set to 0x{:04X}", origin);
            self.outputs.org(origin);
        }

        Ok(())
    }

    fn procedure(&mut self, procedure: &'a Procedure) -> Compiled<()> {
        if procedure.inline {
            return self.reject_org();
        }

        self.place_code()?;

        let name = procedure.name.val();
        log::debug!("compiling procedure {}", name);

        self.define(Rc::clone(name), procedure.name.location())?;
        self.outputs.declare(Rc::clone(name), Linkage::Global);

        self.frame = Some(Frame {
            procedure,
            scopes: vec![HashMap::new()],
        });

        let result = self.block(&procedure.body);
        self.frame = None;

        result
    }

    fn var(&mut self, decl: &'a VarDecl) -> Compiled<()> {
        let name = decl.name.val();
        let location = decl.name.location();
        let device = self.device;

        if let Some(org) = self.pending_org.take() {
            let (org_location, address) = org.split();
            let end = device.ram_end().ok_or_else(|| SemanticError::NoRam.at(&org_location))?;
            if address < device.ram_start || address > end {
                return Err(SemanticError::WrongOrg(address as i32).at(&org_location));
            }

            self.ram_cursor = address - device.ram_start;
        }

        if self.variables.contains_key(name) || self.extern_vars.contains_key(name) {
            return Err(SemanticError::VariableAlreadyDefined(name.to_string()).at(location));
        }

        let length = match &decl.length {
            Some(length) => match self.constant(length)? {
                count if count > 0 => Some(count as u32),
                _ => return Err(SemanticError::InvalidArgument.at(length.location())),
            },

            None => None,
        };

        let var = Variable {
            name: Rc::clone(name),
            address: device.ram_start + self.ram_cursor,
            data_type: decl.data_type,
            length,
        };

        let end = self.ram_cursor + var.size();
        if end > device.ram_size {
            return Err(SemanticError::OutOfRam(name.to_string()).at(location));
        }

        log::debug!("variable {} allocated at 0x{:04X}", name, var.address);

        self.ram_cursor = end;
        self.variables.insert(Rc::clone(name), var);

        Ok(())
    }

    fn extern_var(&mut self, decl: &'a VarDecl) -> Compiled<()> {
        self.reject_org()?;

        let name = decl.name.val();
        let location = decl.name.location();

        if !self.outputs.links_externals() {
            return Err(SemanticError::ExternalOutsideGcc.at(location));
        }

        if self.variables.contains_key(name) || self.extern_vars.contains_key(name) {
            return Err(SemanticError::VariableAlreadyDefined(name.to_string()).at(location));
        }

        let var = ExternVar {
            symbol: Rc::clone(name),
            data_type: decl.data_type,
            offset: 0,
        };

        self.outputs.declare(Rc::clone(name), Linkage::Extern);
        self.extern_vars.insert(Rc::clone(name), var);

        Ok(())
    }

    /// `pin nombre = "B3"`
    fn pin(&mut self, name: &Located<Rc<str>>, pin: &Located<String>) -> Compiled<()> {
        self.reject_org()?;

        let mut chars = pin.val().chars();
        let parsed = match (chars.next(), chars.next(), chars.next()) {
            (Some(port), Some(bit), None) if port.is_ascii_uppercase() => bit
                .to_digit(10)
                .filter(|&bit| bit < 8)
                .map(|bit| Pin {
                    port,
                    bit: bit as u8,
                }),

            _ => None,
        };

        let parsed = parsed
            .filter(|candidate| self.device.has_port(candidate.port))
            .ok_or_else(|| SemanticError::InvalidPin(pin.val().clone()).at(pin.location()))?;

        if self.pins.contains_key(name.val()) {
            let error = SemanticError::PinAlreadyDefined(name.val().to_string());
            return Err(error.at(name.location()));
        }

        if self.pins.values().any(|&other| other == parsed) {
            self.warn(Warning::PinRedefined(pin.val().clone()), pin.location());
        }

        self.pins.insert(Rc::clone(name.val()), parsed);
        Ok(())
    }

    fn global_alias(&mut self, alias: &'a Alias) -> Compiled<()> {
        self.reject_org()?;

        let name = alias.name.val();
        if self.aliases.contains_key(name) {
            let error = SemanticError::GlobalAliasDefined(name.to_string());
            return Err(error.at(alias.name.location()));
        }

        self.aliases.insert(Rc::clone(name), &alias.target);
        Ok(())
    }

    fn local_alias(&mut self, alias: &'a Alias) -> Compiled<()> {
        let name = alias.name.val();
        let location = alias.name.location();

        let shadows = self.aliases.contains_key(name);
        let scope = match self.frame.as_mut().and_then(|frame| frame.scopes.last_mut()) {
            Some(scope) => scope,
            None => return self.global_alias(alias),
        };

        if scope.contains_key(name) {
            return Err(SemanticError::LocalAliasDefined(name.to_string()).at(location));
        }

        scope.insert(Rc::clone(name), &alias.target);
        if shadows {
            self.warn(Warning::NameShadowed(name.to_string()), location);
        }

        Ok(())
    }

    fn block(&mut self, statements: &'a [Located<Statement>]) -> Compiled<()> {
        statements
            .iter()
            .try_for_each(|statement| self.statement(statement))
    }

    fn statement(&mut self, statement: &'a Located<Statement>) -> Compiled<()> {
        let location = statement.location();

        match statement.val() {
            Statement::Expr(expr) => self.expression(expr, location),
            Statement::Call(call) => self.inline_call(call, location),
            Statement::Asm(instruction) => self.asm(instruction).map(|_| ()),

            Statement::Label { name, global } => {
                let name = if *global {
                    Rc::clone(name)
                } else {
                    format!("{}@{}", self.prefix(), name).into()
                };

                self.define(name, location)
            }

            Statement::Goto(name) => {
                let target = self.label_ref(name);
                op!(self, location, Rjmp, target)
            }

            Statement::Break | Statement::Continue => {
                let target = self.loop_target(statement.val(), location)?;
                op!(self, location, Rjmp, target)
            }

            Statement::If {
                condition,
                then,
                otherwise,
            } => self.if_statement(condition, then, otherwise.as_deref(), location),

            Statement::Loop { condition, body } => {
                self.loop_statement(condition.as_ref(), body, location)
            }

            Statement::DoWhile { body, condition } => self.do_while(body, condition, location),
            Statement::Block(statements) => self.block(statements),
            Statement::Use(alias) => self.local_alias(alias),

            Statement::SaveRegs { registers, body } => {
                self.save_registers(registers, body, location)
            }

            Statement::Data(block) => self.data(block, location),
        }
    }

    /// Sentencia formada por una expresión: asignación, incremento o llamada.
    fn expression(&mut self, expr: &'a Expr, location: &Location) -> Compiled<()> {
        match expr {
            Expr::Assign { op, target, value } => {
                let target = self.resolve(target)?;
                let value = self.resolve(value)?;
                self.assign_op(*op, &target, &value, location)
            }

            Expr::Prefix { op, operand } => {
                let increment = match op {
                    PrefixOp::Inc => true,
                    PrefixOp::Dec => false,
                    _ => return Err(SemanticError::Unsupported.at(location)),
                };

                let target = self.resolve(operand)?;
                self.step(&target, increment, location)
            }

            Expr::Suffix { op, operand } => {
                let target = self.resolve(operand)?;
                self.step(&target, *op == SuffixOp::Inc, location)
            }

            Expr::Call(call) => self.inline_call(call, location),
            _ => Err(SemanticError::Unsupported.at(location)),
        }
    }

    /// Expande en el sitio el cuerpo de un procedimiento inline.
    fn inline_call(&mut self, call: &'a Call, location: &Location) -> Compiled<()> {
        let name = call.name.val();

        let procedure = match self.procedures.get(name) {
            Some(procedure) if procedure.inline => *procedure,
            Some(_) => return Err(SemanticError::NotInline(name.to_string()).at(location)),
            None if self.extern_procedures.contains_key(name) => {
                return Err(SemanticError::NotInline(name.to_string()).at(location));
            }

            None => return Err(SemanticError::UnknownFunction(name.to_string()).at(location)),
        };

        let active = self
            .expansions
            .iter()
            .any(|expansion| expansion.procedure.name.val() == name);

        if active {
            return Err(SemanticError::RecursiveInline(name.to_string()).at(location));
        }

        self.bind_arguments(procedure, call, location)?;

        log::debug!("expanding inline procedure {}", name);

        let suffix = format!("_inl{}", self.inlined);
        self.inlined += 1;

        self.expansions.push(Expansion { procedure, suffix });
        if let Some(frame) = &mut self.frame {
            frame.scopes.push(HashMap::new());
        }

        let result = self.block(&procedure.body);

        if let Some(frame) = &mut self.frame {
            frame.scopes.pop();
        }

        self.expansions.pop();
        result
    }

    /// Asigna los argumentos reales a los registros de los parámetros formales.
    fn bind_arguments(
        &mut self,
        procedure: &'a Procedure,
        call: &'a Call,
        location: &Location,
    ) -> Compiled<()> {
        let params = &procedure.params;
        let args = &call.args;

        if args.len() > params.len() {
            let error = SemanticError::ArgumentCount {
                expected: params.len(),
                found: args.len(),
            };

            return Err(error.at(location));
        }

        for arg in args {
            let param = match (&arg.name, params.as_slice()) {
                (Some(name), _) => procedure
                    .param(name)
                    .ok_or_else(|| SemanticError::UnknownArgument(name.to_string()).at(location))?,

                (None, [param]) => param,

                (None, _) => {
                    let error = SemanticError::ArgumentCount {
                        expected: params.len(),
                        found: args.len(),
                    };

                    return Err(error.at(arg.value.location()));
                }
            };

            let target = self.resolve(&param.binding)?;
            let value = self.resolve(&arg.value)?;
            self.assign(&target, &value, arg.value.location())?;
        }

        Ok(())
    }

    fn save_registers(
        &mut self,
        registers: &'a [Located<Expr>],
        body: &'a [Located<Statement>],
        location: &Location,
    ) -> Compiled<()> {
        let mut saved = Vec::new();
        for register in registers {
            match self.resolve(register)? {
                Value::Reg(reg) => saved.push(reg),
                Value::Group(regs) => saved.extend(regs),
                _ => return Err(SemanticError::RegisterOrPairExpected.at(register.location())),
            }
        }

        for &reg in &saved {
            op!(self, location, Push, reg)?;
        }

        self.block(body)?;

        for &reg in saved.iter().rev() {
            op!(self, location, Pop, reg)?;
        }

        Ok(())
    }

    fn loop_target(&self, statement: &Statement, location: &Location) -> Compiled<LabelRef> {
        let labels = self
            .loops
            .last()
            .ok_or_else(|| SemanticError::ParentCycleNotFound.at(location))?;

        let target = match statement {
            Statement::Continue => &labels.next,
            _ => &labels.end,
        };

        Ok(LabelRef::global(Rc::clone(target)))
    }

    /// Compila con un límite de instrucciones y de bytes.
    ///
    /// El conteo de instrucciones se verifica aquí; el tamaño en bytes lo
    /// verifica cada ensamblador al resolver, entre dos etiquetas de sondeo.
    fn compile_limited<F>(
        &mut self,
        max_instructions: usize,
        max_bytes: u32,
        location: &Location,
        body: F,
    ) -> Compiled<()>
    where
        F: FnOnce(&mut Self) -> Compiled<()>,
    {
        let probe = self.probes;
        self.probes += 1;

        let start: Rc<str> = format!("?probe{}_start", probe).into();
        let end: Rc<str> = format!("?probe{}_end", probe).into();

        self.define(Rc::clone(&start), location)?;
        let before = self.instructions;

        body(self)?;

        let found = self.instructions - before;
        self.define(Rc::clone(&end), location)?;
        self.outputs
            .validate_region(start, end, max_bytes, location);

        if found > max_instructions {
            let error = match max_instructions {
                1 => BudgetError::SingleInstruction { found },
                max => BudgetError::TooManyInstructions { max, found },
            };

            return Err(error.at(location));
        }

        Ok(())
    }

    fn data(&mut self, block: &'a DataBlock, location: &Location) -> Compiled<()> {
        let data = self.data_block(block)?;
        self.outputs.data(Located::at(data, location.clone()));

        Ok(())
    }
}

/// Byte `index` de un valor, extendiendo el signo más allá de 32 bits.
fn byte(value: i32, index: usize) -> i32 {
    if index < 4 {
        (value >> (8 * index)) & 0xff
    } else if value < 0 {
        0xff
    } else {
        0
    }
}
