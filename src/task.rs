// 该文件是 Dingsun （定损） 项目的一部分。
// src/task.rs - 分析任务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::{
  analyzer::Analyzer,
  model::ModelSource,
  output::{AnalysisReport, Render},
};

pub trait Task<I, A, O>: Sized {
  type Error;
  fn run_task(self, input: I, analyzer: A, output: O) -> Result<(), Self::Error>;
}

/// 前几次包含模型加载与缓存预热，不计入平均耗时
const WARM_UP_RUNS: usize = 2;

pub struct OneShotTask;

impl<
  'a,
  S: ModelSource,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Vec<u8>>,
  O: Render<AnalysisReport, Error = RE>,
> Task<I, &'a Analyzer<S>, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, analyzer: &'a Analyzer<S>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let bytes = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功（{} 字节），开始分析...", bytes.len());
    let now = Instant::now();
    let result = analyzer.analyze(&bytes)?;
    let elapsed = now.elapsed();
    info!("分析完成，耗时: {:.2?}", elapsed);
    if analyzer.registry().is_degraded() {
      warn!("当前结果由未训练模型给出");
    }
    output.render_result(&AnalysisReport::now(result))?;
    info!("输出完成");

    Ok(())
  }
}

/// 对同一张图像重复分析，统计平均耗时
pub struct RepeatShotTask {
  times: usize,
}

impl RepeatShotTask {
  pub fn new(times: usize) -> Self {
    Self {
      times: times.max(WARM_UP_RUNS + 1),
    }
  }

  pub fn times(&self) -> usize {
    self.times
  }
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self::new(100)
  }
}

impl<
  'a,
  S: ModelSource,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Vec<u8>>,
  O: Render<AnalysisReport, Error = RE>,
> Task<I, &'a Analyzer<S>, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, analyzer: &'a Analyzer<S>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let bytes = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功，重复分析 {} 次...", self.times);

    let mut elapsed = Vec::with_capacity(self.times);
    let mut last = None;
    for i in 0..self.times {
      let now = Instant::now();
      let result = analyzer.analyze(&bytes)?;
      let cost = now.elapsed();
      info!("({})分析完成，耗时: {:.2?}", i, cost);
      elapsed.push(cost);
      last = Some(result);
    }

    warn!(
      "平均分析时间: {:.2?}",
      elapsed.iter().skip(WARM_UP_RUNS).sum::<Duration>() / (elapsed.len() - WARM_UP_RUNS) as u32
    );

    if let Some(result) = last {
      output.render_result(&AnalysisReport::now(result))?;
    }

    Ok(())
  }
}
