//! In-memory driver used by the integration tests.
//!
//! Every raw call appends a line to a shared log so tests can assert on the
//! exact order in which the wrappers reached the driver.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serial_odbc::{
    Driver, DriverError, Error, FetchMode, RawConnection, RawResult, RawStatement, Result, Row,
    Value,
};

/// A scripted query result.
#[derive(Clone, Default)]
pub struct Script {
    /// Rows of each result set, in order.
    pub sets: Vec<Vec<Row>>,
    /// Number of consecutive failing next-set checks after the first result set.
    pub next_set_errors: usize,
}

#[derive(Default)]
pub struct MockState {
    pub log: Vec<String>,
    pub created: usize,
    pub opened: usize,
    pub close_attempts: usize,
    pub results_closed: usize,
    pub descriptors: Vec<String>,
    pub timeouts: Vec<(&'static str, Duration)>,
    pub scripts: HashMap<String, Script>,
    pub fail_open: bool,
    /// Time each raw open blocks before completing.
    pub open_delay: Option<Duration>,
    pub fail_close: HashSet<usize>,
    pub disconnected: HashSet<usize>,
    pub live: HashSet<usize>,
}

#[derive(Clone, Default)]
pub struct MockDriver {
    pub state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, sql: &str, script: Script) {
        self.state.lock().scripts.insert(sql.to_string(), script);
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Drop the session of every raw connection created so far.
    pub fn disconnect_all(&self) {
        let mut state = self.state.lock();
        let live: Vec<usize> = state.live.iter().copied().collect();
        state.disconnected.extend(live);
    }
}

impl Driver for MockDriver {
    fn create_connection(&self) -> Result<Box<dyn RawConnection>> {
        let mut state = self.state.lock();
        state.created += 1;
        let id = state.created;
        Ok(Box::new(MockConnection {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct MockConnection {
    id: usize,
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    fn record(&self, line: String) {
        self.state.lock().log.push(line);
    }
}

impl RawConnection for MockConnection {
    fn set_connect_timeout(&mut self, timeout: Duration) {
        self.state.lock().timeouts.push(("connect", timeout));
    }

    fn set_login_timeout(&mut self, timeout: Duration) {
        self.state.lock().timeouts.push(("login", timeout));
    }

    fn open(&mut self, descriptor: &str) -> Result<()> {
        let delay = self.state.lock().open_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock();
        state.descriptors.push(descriptor.to_string());
        if state.fail_open {
            return Err(DriverError::new("login failed").with_state("28000").into());
        }
        state.opened += 1;
        state.live.insert(self.id);
        state.log.push(format!("open:{}", self.id));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.close_attempts += 1;
        state.live.remove(&self.id);
        state.log.push(format!("close:{}", self.id));
        if state.fail_close.contains(&self.id) {
            return Err(Error::driver(format!("close failed on {}", self.id)));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.state.lock().disconnected.contains(&self.id)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn RawResult>> {
        self.record(format!("query:{sql}"));
        if sql.starts_with("FAIL") {
            return Err(DriverError::new("syntax error").with_state("42000").into());
        }
        let script = self.state.lock().scripts.get(sql).cloned();
        let script = script.unwrap_or_else(|| Script {
            sets: vec![vec![echo_row(sql, params)]],
            next_set_errors: 0,
        });
        Ok(Box::new(MockResult::new(script, Arc::clone(&self.state))))
    }

    fn create_statement(&mut self) -> Result<Box<dyn RawStatement>> {
        self.record("create_statement".into());
        Ok(Box::new(MockStatement {
            sql: None,
            bound: Vec::new(),
            state: Arc::clone(&self.state),
        }))
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.record("begin".into());
        Ok(())
    }

    fn end_transaction(&mut self, rollback: bool) -> Result<()> {
        self.record(if rollback { "rollback" } else { "commit" }.into());
        Ok(())
    }

    fn columns(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> Result<Box<dyn RawResult>> {
        let line = format!("columns:{}", filters([catalog, schema, table, column]));
        self.record(line);
        Ok(Box::new(MockResult::new(
            Script {
                sets: vec![vec![row(&["COLUMN_NAME"], vec![Value::from("id")])]],
                next_set_errors: 0,
            },
            Arc::clone(&self.state),
        )))
    }

    fn tables(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> Result<Box<dyn RawResult>> {
        let line = format!("tables:{}", filters([catalog, schema, table, table_type]));
        self.record(line);
        Ok(Box::new(MockResult::new(
            Script {
                sets: vec![vec![row(&["TABLE_NAME"], vec![Value::from("users")])]],
                next_set_errors: 0,
            },
            Arc::clone(&self.state),
        )))
    }
}

pub struct MockStatement {
    sql: Option<String>,
    bound: Vec<Value>,
    state: Arc<Mutex<MockState>>,
}

impl MockStatement {
    fn record(&self, line: String) {
        self.state.lock().log.push(line);
    }
}

impl RawStatement for MockStatement {
    fn prepare(&mut self, sql: &str) -> Result<()> {
        self.record(format!("prepare:{sql}"));
        self.sql = Some(sql.to_string());
        Ok(())
    }

    fn bind(&mut self, params: &[Value]) -> Result<()> {
        self.record(format!("bind:{}", render(params)));
        if params.iter().any(|p| *p == Value::from("bad")) {
            return Err(Error::driver("cannot bind parameter"));
        }
        self.bound = params.to_vec();
        Ok(())
    }

    fn execute(&mut self) -> Result<Box<dyn RawResult>> {
        self.record(format!("execute:{}", render(&self.bound)));
        let sql = self.sql.clone().unwrap_or_default();
        Ok(Box::new(MockResult::new(
            Script {
                sets: vec![vec![echo_row(&sql, &self.bound)]],
                next_set_errors: 0,
            },
            Arc::clone(&self.state),
        )))
    }

    fn execute_direct(&mut self, sql: &str) -> Result<Box<dyn RawResult>> {
        self.record(format!("execute_direct:{sql}"));
        Ok(Box::new(MockResult::new(
            Script {
                sets: vec![vec![echo_row(sql, &[])]],
                next_set_errors: 0,
            },
            Arc::clone(&self.state),
        )))
    }

    fn execute_non_query(&mut self) -> Result<u64> {
        self.record(format!("execute_non_query:{}", render(&self.bound)));
        Ok(self.bound.len() as u64)
    }
}

pub struct MockResult {
    current: VecDeque<Row>,
    rest: VecDeque<Vec<Row>>,
    next_set_errors: usize,
    fetch_mode: Option<FetchMode>,
    state: Arc<Mutex<MockState>>,
}

impl MockResult {
    fn new(script: Script, state: Arc<Mutex<MockState>>) -> Self {
        let mut rest: VecDeque<Vec<Row>> = script.sets.into();
        let current = rest.pop_front().unwrap_or_default().into();
        Self {
            current,
            rest,
            next_set_errors: script.next_set_errors,
            fetch_mode: None,
            state,
        }
    }
}

impl RawResult for MockResult {
    fn set_fetch_mode(&mut self, mode: FetchMode) {
        self.fetch_mode = Some(mode);
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        Ok(self.current.pop_front())
    }

    fn more_results(&mut self) -> Result<bool> {
        if self.next_set_errors > 0 {
            self.next_set_errors -= 1;
            return Err(Error::driver("next set failed"));
        }
        match self.rest.pop_front() {
            Some(next) => {
                self.current = next.into();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.results_closed += 1;
        state.log.push("result_closed".into());
        Ok(())
    }
}

pub fn row(columns: &[&str], values: Vec<Value>) -> Row {
    let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
    Row::new(columns, values)
}

/// A single row echoing the SQL text followed by every parameter.
fn echo_row(sql: &str, params: &[Value]) -> Row {
    let mut columns = vec!["sql".to_string()];
    columns.extend((0..params.len()).map(|i| format!("p{i}")));
    let mut values = vec![Value::from(sql)];
    values.extend(params.iter().cloned());
    Row::new(columns.into(), values)
}

fn render(params: &[Value]) -> String {
    params
        .iter()
        .map(|p| match p {
            Value::Int(i) => i.to_string(),
            Value::Text(s) => s.clone(),
            other => format!("{other:?}"),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn filters(parts: [Option<&str>; 4]) -> String {
    parts
        .iter()
        .map(|p| p.unwrap_or("-"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub fn driver(mock: &Arc<MockDriver>) -> Arc<dyn Driver> {
    mock.clone()
}
