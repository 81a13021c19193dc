use crate::fft::SpectralTransform;
use crate::tensor::{RealTensor, SpectrumTensor};
use crate::Errors;
use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use rustfft::num_complex::Complex32;
use std::fmt;

const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Params {
    width: u32,
    height: u32,
    planes: u32,
    sign: f32,
}

struct Pipelines {
    rows: wgpu::ComputePipeline,
    cols: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

struct DeviceBuffers {
    params: wgpu::Buffer,
    ping: wgpu::Buffer,
    pong: wgpu::Buffer,
    staging: wgpu::Buffer,
    capacity_planes: usize,
    plane_len: usize,
}

/// GPU transform backend. The batched spectra stay resident in storage
/// buffers between the row and column passes of the DFT kernel; pipelines
/// and buffers are created once at [SpectralTransform::init] for the fixed
/// problem size.
pub struct GpuDft {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: Pipelines,
    buffers: Option<DeviceBuffers>,
    size: Option<(usize, usize, usize, usize)>,
    window: Option<RealTensor>,
}

impl fmt::Debug for GpuDft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuDft").field("size", &self.size).finish()
    }
}

impl GpuDft {
    /// Selects a high-performance adapter and builds the DFT pipelines.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| Errors::GpuUnavailable("no adapter".into()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("corrfilter-dft"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| Errors::GpuUnavailable(e.to_string()))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("dft"),
            source: wgpu::ShaderSource::Wgsl(include_str!("dft.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("dft_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("dft_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let rows = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("dft_rows"),
            layout: Some(&layout),
            module: &shader,
            entry_point: "dft_rows",
        });
        let cols = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("dft_cols"),
            layout: Some(&layout),
            module: &shader,
            entry_point: "dft_cols",
        });

        Ok(Self {
            device,
            queue,
            pipelines: Pipelines {
                rows,
                cols,
                bind_group_layout,
            },
            buffers: None,
            size: None,
            window: None,
        })
    }

    fn buffers(&self) -> Result<&DeviceBuffers> {
        self.buffers
            .as_ref()
            .ok_or_else(|| Errors::TransformNotInitialized.into())
    }

    /// Runs rows then columns over `planes` planes already uploaded to the
    /// ping buffer, leaving the result in the ping buffer, then reads it
    /// back.
    fn run(&self, planes: usize, sign: f32) -> Result<Vec<Complex32>> {
        let buffers = self.buffers()?;
        let (width, height, ..) = self.size.ok_or(Errors::TransformNotInitialized)?;
        let total = (planes * width * height) as u32;
        let groups = (total + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE;

        self.queue.write_buffer(
            &buffers.params,
            0,
            bytemuck::bytes_of(&Params {
                width: width as u32,
                height: height as u32,
                planes: planes as u32,
                sign,
            }),
        );

        let bind = |src: &wgpu::Buffer, dst: &wgpu::Buffer| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("dft_bind_group"),
                layout: &self.pipelines.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffers.params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: src.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: dst.as_entire_binding(),
                    },
                ],
            })
        };
        let ping_to_pong = bind(&buffers.ping, &buffers.pong);
        let pong_to_ping = bind(&buffers.pong, &buffers.ping);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("dft") });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("dft_rows"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.rows);
            pass.set_bind_group(0, &ping_to_pong, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("dft_cols"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.cols);
            pass.set_bind_group(0, &pong_to_ping, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        let byte_len = (planes * width * height * 8) as u64;
        encoder.copy_buffer_to_buffer(&buffers.ping, 0, &buffers.staging, 0, byte_len);
        self.queue.submit(Some(encoder.finish()));

        let slice = buffers.staging.slice(..byte_len);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| Errors::GpuUnavailable(e.to_string()))?
            .map_err(|e| Errors::GpuUnavailable(e.to_string()))?;

        let samples: Vec<Complex32> = {
            let mapped = slice.get_mapped_range();
            let floats: &[f32] = bytemuck::cast_slice(&mapped);
            floats
                .chunks_exact(2)
                .map(|c| Complex32::new(c[0], c[1]))
                .collect()
        };
        buffers.staging.unmap();
        Ok(samples)
    }

    fn upload(&self, samples: &[Complex32]) -> Result<()> {
        let buffers = self.buffers()?;
        assert!(samples.len() <= buffers.capacity_planes * buffers.plane_len);
        let floats: Vec<f32> = samples.iter().flat_map(|c| [c.re, c.im]).collect();
        self.queue
            .write_buffer(&buffers.ping, 0, bytemuck::cast_slice(&floats));
        Ok(())
    }

    fn check_spatial(&self, width: usize, height: usize, channels: usize, batch: usize) -> Result<()> {
        let (w, h, ..) = self.size.ok_or(Errors::TransformNotInitialized)?;
        if width != w || height != h {
            return Err(Errors::TransformShape {
                expected: "the initialized spatial size",
                width,
                height,
                channels,
                batch,
            }
            .into());
        }
        Ok(())
    }
}

impl SpectralTransform for GpuDft {
    fn init(
        &mut self,
        width: usize,
        height: usize,
        channels: usize,
        hypotheses: usize,
    ) -> Result<()> {
        let plane_len = width * height;
        let capacity_planes = channels * hypotheses.max(1);
        let byte_len = (capacity_planes * plane_len * 8) as u64;

        let storage = |label: &str| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: byte_len,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };

        self.buffers = Some(DeviceBuffers {
            params: self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("dft_params"),
                size: std::mem::size_of::<Params>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            ping: storage("dft_ping"),
            pong: storage("dft_pong"),
            staging: self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("dft_staging"),
                size: byte_len,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            capacity_planes,
            plane_len,
        });
        self.size = Some((width, height, channels, hypotheses));
        self.window = None;
        Ok(())
    }

    fn set_window(&mut self, window: RealTensor) {
        if let Some((w, h, ..)) = self.size {
            assert_eq!(window.width(), w);
            assert_eq!(window.height(), h);
        }
        assert_eq!(window.batch(), 1);
        assert_eq!(window.channels(), 1);
        self.window = Some(window);
    }

    fn forward(&self, input: &RealTensor) -> Result<SpectrumTensor> {
        self.check_spatial(input.width(), input.height(), input.channels(), input.batch())?;
        if input.channels() != 1 {
            return Err(Errors::TransformShape {
                expected: "a single-channel input",
                width: input.width(),
                height: input.height(),
                channels: input.channels(),
                batch: input.batch(),
            }
            .into());
        }
        let samples: Vec<Complex32> = input
            .data()
            .iter()
            .map(|v| Complex32::new(*v, 0.0))
            .collect();
        self.upload(&samples)?;
        let planes = input.batch();
        let out = self.run(planes, 1.0)?;
        Ok(SpectrumTensor::from_data(
            out,
            input.batch(),
            1,
            input.height(),
            input.width(),
        ))
    }

    fn forward_window(&self, patch: &RealTensor) -> Result<SpectrumTensor> {
        self.check_spatial(patch.width(), patch.height(), patch.channels(), patch.batch())?;
        let window = self.window.as_ref().ok_or(Errors::TransformNotInitialized)?;

        let plane = patch.plane_len();
        let samples: Vec<Complex32> = patch
            .data()
            .chunks(plane)
            .flat_map(|chunk| {
                chunk
                    .iter()
                    .zip(window.data().iter())
                    .map(|(v, w)| Complex32::new(v * w, 0.0))
            })
            .collect();
        self.upload(&samples)?;
        let planes = patch.batch() * patch.channels();
        let out = self.run(planes, 1.0)?;
        Ok(SpectrumTensor::from_data(
            out,
            patch.batch(),
            patch.channels(),
            patch.height(),
            patch.width(),
        ))
    }

    fn inverse(&self, spectrum: &SpectrumTensor) -> Result<RealTensor> {
        self.check_spatial(
            spectrum.width(),
            spectrum.height(),
            spectrum.channels(),
            spectrum.batch(),
        )?;
        self.upload(spectrum.data())?;
        let planes = spectrum.batch() * spectrum.channels();
        let out = self.run(planes, -1.0)?;
        let scale = 1.0 / spectrum.plane_len() as f32;
        Ok(RealTensor::from_data(
            out.iter().map(|c| c.re * scale).collect(),
            spectrum.batch(),
            spectrum.channels(),
            spectrum.height(),
            spectrum.width(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::cpu::CpuFft;

    fn gpu() -> Option<GpuDft> {
        GpuDft::new().ok()
    }

    #[test]
    fn matches_cpu_backend() {
        let Some(mut gpu) = gpu() else {
            eprintln!("no GPU adapter available, skipping");
            return;
        };
        let mut cpu = CpuFft::new();
        gpu.init(8, 8, 2, 3).unwrap();
        cpu.init(8, 8, 2, 3).unwrap();
        let window = crate::fft::cosine_window(8, 8);
        gpu.set_window(window.clone());
        cpu.set_window(window);

        let mut patch = RealTensor::zeros(3, 2, 8, 8);
        for (i, v) in patch.data_mut().iter_mut().enumerate() {
            *v = ((i * 13 % 29) as f32) * 0.1 - 1.0;
        }

        let a = gpu.forward_window(&patch).unwrap();
        let b = cpu.forward_window(&patch).unwrap();
        for (x, y) in a.data().iter().zip(b.data().iter()) {
            assert!((x - y).norm() < 1e-2);
        }

        let ra = gpu.inverse(&a).unwrap();
        let rb = cpu.inverse(&b).unwrap();
        for (x, y) in ra.data().iter().zip(rb.data().iter()) {
            assert!((x - y).abs() < 1e-3);
        }
    }
}
