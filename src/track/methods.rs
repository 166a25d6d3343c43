/// `track/methods.rs` — method execution against a loaded session
///
/// The structural `matrix` call is pulled out of a method list and applied
/// first; the remaining calls are then invoked concurrently. Option values
/// are resolved host-side (random ranges, random picks, no-repeat).
use std::collections::HashMap;

use futures_util::future::join_all;
use rand::{seq::SliceRandom, Rng};
use serde_json::{Map, Value};

use crate::{
    error::{HostError, HostResult},
    types::{MethodCall, MethodOption},
};

use super::controller::{LoadedSession, TrackController};

/// Splits a method list into its structural call (last one wins) and the rest.
pub fn split_structural(methods: &[MethodCall]) -> (Option<MethodCall>, Vec<MethodCall>) {
    let structural = methods.iter().filter(|m| m.is_matrix()).last().cloned();
    let ordinary = methods.iter().filter(|m| !m.is_matrix()).cloned().collect();
    (structural, ordinary)
}

/// Concrete value for one option. `last` is the previous value when the
/// option asks not to repeat itself.
pub fn resolve_option<R: Rng>(option: &MethodOption, last: Option<&Value>, rng: &mut R) -> Value {
    let avoid = if option.no_repeat { last } else { None };

    if let Some(values) = option.random_values.as_ref().filter(|v| !v.is_empty()) {
        let candidates: Vec<&Value> = match avoid {
            Some(prev) if values.iter().any(|v| v != prev) => {
                values.iter().filter(|v| *v != prev).collect()
            }
            _ => values.iter().collect(),
        };
        if let Some(pick) = candidates.choose(rng) {
            return (*pick).clone();
        }
    }

    if let Some((a, b)) = option.random_range {
        if a.is_finite() && b.is_finite() {
            let (lo, hi) = if a > b { (b, a) } else { (a, b) };
            if lo.fract() == 0.0 && hi.fract() == 0.0 {
                let (lo, hi) = (lo as i64, hi as i64);
                let prev = avoid.and_then(Value::as_i64);
                return Value::from(random_int(lo, hi, prev, rng));
            }
            if lo < hi {
                return Value::from(rng.gen_range(lo..hi));
            }
            return Value::from(lo);
        }
    }

    option.value.clone()
}

/// Inclusive pick in `lo..=hi`, skipping `prev` when there is another choice.
fn random_int<R: Rng>(lo: i64, hi: i64, prev: Option<i64>, rng: &mut R) -> i64 {
    match prev {
        Some(p) if lo < hi && (lo..=hi).contains(&p) => {
            let v = rng.gen_range(lo..hi);
            if v >= p {
                v + 1
            } else {
                v
            }
        }
        _ => rng.gen_range(lo..=hi),
    }
}

impl TrackController {
    /// Resolve every option of `call`, updating the no-repeat memory.
    pub(super) fn resolve_call(&self, instance_id: &str, call: &MethodCall, is_constructor: bool) -> Map<String, Value> {
        let key = format!("{instance_id}:{}", call.name);
        let mut rng = rand::thread_rng();
        let mut inner = self.lock();
        let memory: &mut HashMap<String, Value> = inner.no_repeat.entry(key).or_default();

        let mut out = Map::new();
        for option in &call.options {
            let last = if is_constructor { None } else { memory.get(&option.name) };
            let value = resolve_option(option, last, &mut rng);
            if option.no_repeat && !is_constructor {
                memory.insert(option.name.clone(), value.clone());
            }
            out.insert(option.name.clone(), value);
        }
        out
    }

    /// Run `methods` for one instance: the structural call first, then the
    /// others concurrently. Constructor lists never carry a structural call
    /// here; the runtime bakes it into the instance container.
    pub async fn execute_methods(
        &self,
        session: &LoadedSession,
        methods: &[MethodCall],
        instance_id: &str,
        is_constructor: bool,
        debug_context: &str,
    ) -> HostResult<()> {
        let (structural, ordinary) = split_structural(methods);
        if let Some(matrix) = structural.filter(|_| !is_constructor) {
            self.apply_matrix(session, instance_id, &matrix, debug_context).await?;
        }
        self.invoke_all(session, &ordinary, instance_id, is_constructor, debug_context)
            .await
    }

    /// Rebuild the instance with new matrix options, then replay its
    /// non-structural constructor methods.
    pub(super) async fn apply_matrix(
        &self,
        session: &LoadedSession,
        instance_id: &str,
        matrix: &MethodCall,
        debug_context: &str,
    ) -> HostResult<()> {
        let options = Value::Object(self.resolve_call(instance_id, matrix, false));
        let response = session
            .client
            .set_matrix_for_instance(
                instance_id,
                session.track.clone(),
                session.module_sources.clone(),
                session.assets_base_url.clone(),
                options.clone(),
            )
            .await;
        if !response.ok {
            let err = HostError::SandboxSetMatrixFailed {
                instance_id: instance_id.to_string(),
                error: response.error_text(),
            };
            self.ctx
                .debug_log(log::Level::Warn, format!("[track] {debug_context}: {err}"));
            return Err(err);
        }
        self.lock()
            .matrix_overrides
            .insert(instance_id.to_string(), options);

        let constructor: Vec<MethodCall> = session
            .track
            .modules_data
            .get(instance_id)
            .map(|d| d.constructor.iter().filter(|c| !c.is_matrix()).cloned().collect())
            .unwrap_or_default();
        if !constructor.is_empty() {
            self.invoke_all(session, &constructor, instance_id, true, debug_context)
                .await?;
        }
        Ok(())
    }

    /// Invoke non-structural calls concurrently; reports the first failure.
    pub(super) async fn invoke_all(
        &self,
        session: &LoadedSession,
        calls: &[MethodCall],
        instance_id: &str,
        is_constructor: bool,
        debug_context: &str,
    ) -> HostResult<()> {
        let requests: Vec<(String, Map<String, Value>)> = calls
            .iter()
            .filter(|c| !c.is_matrix())
            .map(|c| (c.name.clone(), self.resolve_call(instance_id, c, is_constructor)))
            .collect();

        let responses = join_all(requests.into_iter().map(|(name, options)| async move {
            let response = session
                .client
                .invoke_on_instance(instance_id, &name, options)
                .await;
            (name, response)
        }))
        .await;

        let mut first_error = None;
        for (name, response) in responses {
            if response.ok {
                continue;
            }
            let err = HostError::SandboxInvokeFailed {
                instance_id: instance_id.to_string(),
                method: name,
                error: response.error_text(),
            };
            self.ctx
                .debug_log(log::Level::Warn, format!("[track] {debug_context}: {err}"));
            first_error.get_or_insert(err);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::testing::call;
    use rand::{rngs::StdRng, SeedableRng};

    fn option(value: Value) -> MethodOption {
        MethodOption {
            name: "v".to_string(),
            value,
            random_range: None,
            random_values: None,
            no_repeat: false,
        }
    }

    #[test]
    fn split_keeps_last_matrix_only() {
        let methods = vec![
            call("matrix", &[("rows", Value::from(1))]),
            call("flash", &[]),
            call("matrix", &[("rows", Value::from(4))]),
        ];
        let (structural, ordinary) = split_structural(&methods);
        assert_eq!(structural.unwrap().options[0].value, Value::from(4));
        assert_eq!(ordinary.len(), 1);
        assert_eq!(ordinary[0].name, "flash");
    }

    #[test]
    fn plain_value_passes_through() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(resolve_option(&option(Value::from("x")), None, &mut rng), Value::from("x"));
    }

    #[test]
    fn integer_range_swaps_bounds_and_stays_integral() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut opt = option(Value::Null);
        opt.random_range = Some((5.0, 1.0));
        for _ in 0..100 {
            let v = resolve_option(&opt, None, &mut rng);
            let n = v.as_i64().expect("integral value");
            assert!((1..=5).contains(&n));
        }
    }

    #[test]
    fn float_range_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut opt = option(Value::Null);
        opt.random_range = Some((0.5, 0.25));
        for _ in 0..100 {
            let v = resolve_option(&opt, None, &mut rng).as_f64().unwrap();
            assert!((0.25..0.5).contains(&v));
        }
    }

    #[test]
    fn no_repeat_never_picks_previous_value() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut opt = option(Value::Null);
        opt.random_values = Some(vec![Value::from("a"), Value::from("b")]);
        opt.no_repeat = true;
        let prev = Value::from("a");
        for _ in 0..50 {
            assert_eq!(resolve_option(&opt, Some(&prev), &mut rng), Value::from("b"));
        }

        let mut range = option(Value::Null);
        range.random_range = Some((1.0, 2.0));
        range.no_repeat = true;
        for _ in 0..50 {
            assert_eq!(resolve_option(&range, Some(&Value::from(1)), &mut rng), Value::from(2));
        }
    }

    #[test]
    fn single_candidate_repeats_when_unavoidable() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut opt = option(Value::Null);
        opt.random_values = Some(vec![Value::from(3)]);
        opt.no_repeat = true;
        assert_eq!(resolve_option(&opt, Some(&Value::from(3)), &mut rng), Value::from(3));
    }
}
