use dataflow_rt::array::{Array, ElementType, Value};
use dataflow_rt::clock::{Clock, SteadyClock};
use dataflow_rt::device::Device;
use dataflow_rt::devfilter::{DevFilter, MatchOp, Rule};
use dataflow_rt::service::Service;
use std::sync::Arc;

#[tokio::test]
async fn immediate_rule_relays_matching_value() {
    let clock: Arc<dyn Clock> = Arc::new(SteadyClock::new());
    let mut filter = DevFilter::new("filter", clock.clone());
    filter.core().add_channel("in", ElementType::I32, 1).unwrap();
    filter.core().add_channel("out", ElementType::I32, 1).unwrap();
    filter.add_rule(Rule {
        input: "in".into(),
        output: "out".into(),
        trigger_idx: 0,
        trigger_value: Some(Value::I32(0)),
        match_op: MatchOp::Equal,
        should_match: false,
        write_idx: 0,
        write_value: None,
        write_same_value: true,
        nano_delay: 0,
    });

    filter.setup().await.unwrap();
    filter.init().await.unwrap();
    filter.start().await.unwrap();

    let channel_in = filter.core().channel("in").unwrap();
    let channel_out = filter.core().channel("out").unwrap();

    let mut src = Array::zeroed(ElementType::I32, 1);
    src.set(0, Value::I32(7)).unwrap();
    channel_in.write(src.view()).await.unwrap();

    assert_eq!(channel_out.read(0).unwrap(), Value::I32(7));
}
