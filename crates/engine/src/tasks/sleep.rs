//! Control-path tasks which pass their input through after waiting.
use super::{expect_one_input, int_param, trace_field};
use crate::{Error, ExecCtx, Result, TaskSpec};
use futures::future::BoxFuture;
use futures::FutureExt;
use models::{OutputPattern, ParamField, TaskParamType, ValidatedParams};
use rowset::RowSet;
use serde_json::json;
use std::time::{Duration, Instant};

pub(super) fn sleep_spec() -> TaskSpec {
    TaskSpec {
        op: "sleep",
        params_schema: vec![
            ParamField::required("duration_ms", TaskParamType::Int),
            ParamField::optional("fail_after_sleep", TaskParamType::Bool).with_default(json!(false)),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: Vec::new(),
        writes_effect: None,
        default_budget_ms: 10_000,
        output_pattern: OutputPattern::UnaryPreserveView,
        is_io: false,
        run: run_sleep,
        run_async: Some(run_sleep_async),
    }
}

pub(super) fn busy_cpu_spec() -> TaskSpec {
    TaskSpec {
        op: "busy_cpu",
        params_schema: vec![
            ParamField::required("busy_wait_ms", TaskParamType::Int),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: Vec::new(),
        writes_effect: None,
        default_budget_ms: 1_000,
        output_pattern: OutputPattern::UnaryPreserveView,
        is_io: false,
        run: run_busy_cpu,
        run_async: None,
    }
}

struct Sleep<'i> {
    input: &'i RowSet,
    duration: Duration,
    fail: bool,
}

impl<'i> Sleep<'i> {
    fn parse(inputs: &'i [RowSet], params: &ValidatedParams) -> Result<Self> {
        let input = expect_one_input("sleep", inputs)?;
        let duration_ms = int_param("sleep", params, "duration_ms")?;
        if duration_ms < 0 {
            return Err(Error::task("sleep: 'duration_ms' must be >= 0"));
        }
        Ok(Self {
            input,
            duration: Duration::from_millis(duration_ms as u64),
            fail: params.get_bool("fail_after_sleep").unwrap_or(false),
        })
    }

    fn finish(self) -> Result<RowSet> {
        if self.fail {
            return Err(Error::task(
                "sleep: intentional failure (fail_after_sleep=true)",
            ));
        }
        Ok(self.input.clone())
    }
}

fn run_sleep(inputs: &[RowSet], params: &ValidatedParams, _: &ExecCtx<'_>) -> Result<RowSet> {
    let sleep = Sleep::parse(inputs, params)?;
    if !sleep.duration.is_zero() {
        std::thread::sleep(sleep.duration);
    }
    sleep.finish()
}

fn run_sleep_async<'a>(
    inputs: &'a [RowSet],
    params: &'a ValidatedParams,
    _: &'a ExecCtx<'a>,
) -> BoxFuture<'a, Result<RowSet>> {
    async move {
        let sleep = Sleep::parse(inputs, params)?;
        if !sleep.duration.is_zero() {
            tokio::time::sleep(sleep.duration).await;
        }
        sleep.finish()
    }
    .boxed()
}

fn run_busy_cpu(inputs: &[RowSet], params: &ValidatedParams, _: &ExecCtx<'_>) -> Result<RowSet> {
    let input = expect_one_input("busy_cpu", inputs)?;
    let busy_wait_ms = int_param("busy_cpu", params, "busy_wait_ms")?;
    if busy_wait_ms < 0 {
        return Err(Error::task("busy_cpu: 'busy_wait_ms' must be >= 0"));
    }

    let end = Instant::now() + Duration::from_millis(busy_wait_ms as u64);
    while Instant::now() < end {
        std::hint::spin_loop();
    }
    Ok(input.clone())
}
