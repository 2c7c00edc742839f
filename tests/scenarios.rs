//! Integration tests for the concrete scenarios S1-S6, each a complete
//! embedded SCXML document driven end to end through the public API.
//! Modeled on the donor's `run_test_manual` assertion shape (drive events,
//! check the final configuration) but calling the synchronous `initialize`/
//! `send_event` functions directly instead of spawning a worker thread.

use scxml_core::event::Event;
use scxml_core::value::Value;
use scxml_core::{initialize, parse, send_event, validate};

fn load(xml: &str) -> scxml_core::OptimizedDocument {
    let doc = parse(xml.as_bytes()).expect("parse");
    validate(doc).expect("validate").0
}

fn leaves(chart: &scxml_core::StateChart<'_>) -> Vec<String> {
    let mut l = chart.active_leaves();
    l.sort();
    l
}

#[test]
fn s1_raised_event_routing() {
    let xml = r#"
        <scxml initial="a">
          <state id="a">
            <transition event="t" target="b">
              <raise event="s"/>
            </transition>
          </state>
          <state id="b">
            <transition event="s" target="c"/>
          </state>
          <state id="c"/>
        </scxml>
    "#;
    let doc = load(xml);
    let chart = initialize(&doc);
    let chart = send_event(chart, Event::external("t", Value::Undefined));
    assert_eq!(leaves(&chart), vec!["c".to_string()]);
}

#[test]
fn s2_conditional_routing() {
    let xml = r#"
        <scxml initial="entry">
          <datamodel>
            <data id="amount" expr="2500"/>
          </datamodel>
          <state id="entry">
            <transition event="submit" cond="amount&lt;=1000" target="auto"/>
            <transition event="submit" cond="amount&lt;=5000" target="manager"/>
            <transition event="submit" target="exec"/>
          </state>
          <state id="auto"/>
          <state id="manager"/>
          <state id="exec"/>
        </scxml>
    "#;
    let doc = load(xml);
    let chart = initialize(&doc);
    let chart = send_event(chart, Event::external("submit", Value::Undefined));
    assert_eq!(leaves(&chart), vec!["manager".to_string()]);
}

#[test]
fn s3_parallel_completion() {
    let xml = r#"
        <scxml initial="p">
          <parallel id="p">
            <transition event="done.state.p" target="pass"/>
            <state id="r1" initial="r1a">
              <state id="r1a">
                <transition event="go1" target="r1f"/>
              </state>
              <final id="r1f"/>
            </state>
            <state id="r2" initial="r2a">
              <state id="r2a">
                <transition event="go2" target="r2f"/>
              </state>
              <final id="r2f"/>
            </state>
          </parallel>
          <state id="pass"/>
        </scxml>
    "#;
    let doc = load(xml);
    let chart = initialize(&doc);
    let chart = send_event(chart, Event::external("go1", Value::Undefined));
    let chart = send_event(chart, Event::external("go2", Value::Undefined));
    assert_eq!(leaves(&chart), vec!["pass".to_string()]);
}

#[test]
fn s4_shallow_history() {
    let xml = r#"
        <scxml initial="P">
          <state id="P" initial="a">
            <history id="ph" type="shallow">
              <transition target="a"/>
            </history>
            <state id="a">
              <transition event="x" target="b"/>
            </state>
            <state id="b"/>
            <transition event="exit" target="Q"/>
          </state>
          <state id="Q">
            <transition event="back" target="ph"/>
          </state>
        </scxml>
    "#;
    let doc = load(xml);
    let chart = initialize(&doc);
    assert_eq!(leaves(&chart), vec!["a".to_string()]);
    let chart = send_event(chart, Event::external("x", Value::Undefined));
    assert_eq!(leaves(&chart), vec!["b".to_string()]);
    let chart = send_event(chart, Event::external("exit", Value::Undefined));
    assert_eq!(leaves(&chart), vec!["Q".to_string()]);
    let chart = send_event(chart, Event::external("back", Value::Undefined));
    assert_eq!(leaves(&chart), vec!["b".to_string()]);
}

#[test]
fn s5_foreach_with_raise_and_assign() {
    let xml = r#"
        <scxml initial="s">
          <datamodel>
            <data id="sum" expr="0"/>
            <data id="xs" expr="[1,2,3]"/>
          </datamodel>
          <state id="s">
            <onentry>
              <foreach array="xs" item="i">
                <assign location="sum" expr="sum+i"/>
              </foreach>
            </onentry>
          </state>
        </scxml>
    "#;
    let doc = load(xml);
    let chart = initialize(&doc);
    assert_eq!(chart.data.get("sum"), Some(&Value::Number(6.0)));
    assert_eq!(chart.data.get("i"), Some(&Value::Number(3.0)));
}

#[test]
fn s6_internal_transition_preserves_child() {
    let xml = r#"
        <scxml initial="S">
          <datamodel>
            <data id="count" expr="0"/>
            <data id="entries" expr="0"/>
          </datamodel>
          <state id="S" initial="S1">
            <onentry>
              <assign location="entries" expr="entries+1"/>
            </onentry>
            <transition event="tick" type="internal">
              <assign location="count" expr="count+1"/>
            </transition>
            <state id="S1"/>
          </state>
        </scxml>
    "#;
    let doc = load(xml);
    let mut chart = initialize(&doc);
    for _ in 0..3 {
        chart = send_event(chart, Event::external("tick", Value::Undefined));
    }
    assert_eq!(leaves(&chart), vec!["S1".to_string()]);
    assert_eq!(chart.data.get("count"), Some(&Value::Number(3.0)));
    assert_eq!(chart.data.get("entries"), Some(&Value::Number(1.0)));
}
