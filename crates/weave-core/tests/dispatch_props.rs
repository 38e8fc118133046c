// SPDX-License-Identifier: Apache-2.0
//! Property test for the dispatch order contract: runnable work drains
//! band by band, FIFO within a band, whatever the arrival pattern.

mod common;

use common::{attach, log, rt, settle, PROBE_NAME};
use proptest::prelude::*;
use weave_core::{Band, Value};

/// Block priorities plus a shuffled write order over the same blocks.
fn cases() -> impl Strategy<Value = (Vec<i64>, Vec<usize>)> {
    (3usize..=5).prop_flat_map(|n| {
        (
            prop::collection::vec(-1i64..=3, n),
            Just((0..n).collect::<Vec<usize>>()).prop_shuffle(),
        )
    })
}

proptest! {
    #[test]
    fn dispatch_order_is_band_then_arrival((priorities, arrival) in cases()) {
        let mut rt = rt();
        for (i, p) in priorities.iter().enumerate() {
            let name = format!("t{i}");
            rt.create_block("", &name).unwrap();
            rt.set_value(&format!("{name}.tag"), Value::Str(name.clone())).unwrap();
            attach(&mut rt, &name, PROBE_NAME);
            rt.set_value(&format!("{name}.#priority"), Value::Int(*p)).unwrap();
        }
        settle(&mut rt);

        for &idx in &arrival {
            rt.set_value(&format!("t{idx}.in"), Value::Int(1)).unwrap();
        }
        rt.run_pass().unwrap();

        // The queue is drained band by band; arrival order survives inside
        // each band. A stable sort of the arrivals by band is the oracle.
        let mut expected_order = arrival.clone();
        expected_order.sort_by_key(|&i| Band::from_priority(priorities[i]).index());
        let expected: String = expected_order.iter().map(|i| format!("t{i};")).collect();
        prop_assert_eq!(log(&rt), expected);
    }
}
